use crate::types::{PixelFormat, Rect};

/// Bytes per source pixel. Every readable target stores 8-bit RGBA or BGRA.
pub(crate) const SOURCE_BYTES_PER_PIXEL: usize = 4;

/// Channel order of the 4-byte source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceOrder {
    Rgba,
    Bgra,
}

impl SourceOrder {
    fn to_rgba(self, pixel: &[u8]) -> [u8; 4] {
        match self {
            SourceOrder::Rgba => [pixel[0], pixel[1], pixel[2], pixel[3]],
            SourceOrder::Bgra => [pixel[2], pixel[1], pixel[0], pixel[3]],
        }
    }
}

/// Strided view over source rows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceRows<'a> {
    pub bytes: &'a [u8],
    pub stride: usize,
    pub order: SourceOrder,
}

/// Packs `rect` of `src` into `dst` as tightly packed `format` rows.
///
/// `dst` must hold exactly `rect.pixel_count() * format.bytes_per_pixel()`
/// bytes and `rect` must lie inside `src`.
pub(crate) fn pack_region(
    src: SourceRows<'_>,
    rect: Rect,
    format: PixelFormat,
    reverse_rows: bool,
    dst: &mut [u8],
) {
    let bpp = usize::from(format.bytes_per_pixel());
    let width = rect.width as usize;
    let height = rect.height as usize;
    let dst_row_len = width * bpp;
    debug_assert_eq!(dst.len(), dst_row_len * height);

    for row in 0..height {
        let start = (rect.y as usize + row) * src.stride + rect.x as usize * SOURCE_BYTES_PER_PIXEL;
        let src_row = &src.bytes[start..start + width * SOURCE_BYTES_PER_PIXEL];
        let out_row = if reverse_rows { height - 1 - row } else { row };
        let dst_row = &mut dst[out_row * dst_row_len..(out_row + 1) * dst_row_len];
        for (pixel, out) in src_row
            .chunks_exact(SOURCE_BYTES_PER_PIXEL)
            .zip(dst_row.chunks_exact_mut(bpp))
        {
            write_pixel(format, src.order.to_rgba(pixel), out);
        }
    }
}

fn write_pixel(format: PixelFormat, [r, g, b, a]: [u8; 4], out: &mut [u8]) {
    match format {
        PixelFormat::Rgba8 => out.copy_from_slice(&[r, g, b, a]),
        PixelFormat::Bgra8 => out.copy_from_slice(&[b, g, r, a]),
        PixelFormat::Rgb8 => out.copy_from_slice(&[r, g, b]),
        PixelFormat::Red8 => out[0] = r,
        PixelFormat::Alpha8 => out[0] = a,
    }
}

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
pub(crate) fn align_to(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: usize, height: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            for x in 0..width {
                bytes.extend([x as u8, y as u8, 10 * x as u8 + y as u8, 255]);
            }
        }
        bytes
    }

    #[test]
    fn copies_offset_region_from_strided_source() {
        let bytes = gradient(4, 3);
        let src = SourceRows {
            bytes: &bytes,
            stride: 16,
            order: SourceOrder::Rgba,
        };
        let mut dst = vec![0u8; 2 * 2 * 4];
        pack_region(src, Rect::new(1, 1, 2, 2), PixelFormat::Rgba8, false, &mut dst);
        assert_eq!(&dst[0..4], &[1, 1, 11, 255]);
        assert_eq!(&dst[4..8], &[2, 1, 21, 255]);
        assert_eq!(&dst[8..12], &[1, 2, 12, 255]);
    }

    #[test]
    fn reverse_rows_flips_vertically() {
        let bytes = gradient(1, 3);
        let src = SourceRows {
            bytes: &bytes,
            stride: 4,
            order: SourceOrder::Rgba,
        };
        let mut dst = vec![0u8; 3];
        pack_region(src, Rect::sized(1, 3), PixelFormat::Red8, true, &mut dst);
        assert_eq!(dst, vec![0, 0, 0]);
        pack_region(src, Rect::sized(1, 3), PixelFormat::Alpha8, true, &mut dst);
        assert_eq!(dst, vec![255, 255, 255]);

        let mut rows = vec![0u8; 3 * 3];
        pack_region(src, Rect::sized(1, 3), PixelFormat::Rgb8, true, &mut rows);
        assert_eq!(rows, vec![0, 2, 2, 0, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn swizzles_between_channel_orders() {
        let bgra = [30u8, 20, 10, 40];
        let src = SourceRows {
            bytes: &bgra,
            stride: 4,
            order: SourceOrder::Bgra,
        };
        let mut dst = [0u8; 4];
        pack_region(src, Rect::sized(1, 1), PixelFormat::Rgba8, false, &mut dst);
        assert_eq!(dst, [10, 20, 30, 40]);
        pack_region(src, Rect::sized(1, 1), PixelFormat::Bgra8, false, &mut dst);
        assert_eq!(dst, bgra);
    }

    #[test]
    fn skips_row_padding() {
        let mut bytes = vec![0u8; 2 * 256];
        bytes[0..4].copy_from_slice(&[1, 2, 3, 4]);
        bytes[256..260].copy_from_slice(&[5, 6, 7, 8]);
        let src = SourceRows {
            bytes: &bytes,
            stride: 256,
            order: SourceOrder::Rgba,
        };
        let mut dst = [0u8; 8];
        pack_region(src, Rect::sized(1, 2), PixelFormat::Rgba8, false, &mut dst);
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn aligns_up_to_power_of_two() {
        assert_eq!(align_to(0, 256), 0);
        assert_eq!(align_to(4, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
    }
}
