use texreader::{
    CaptureRequest, CaptureTarget, ErrorKind, PixelFormat, ReadbackError, ReaderConfig, Rect,
    SoftwareDevice, Strategy, TexReader, TextureId,
};

const RED: [u8; 4] = [255, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn rgba(target: CaptureTarget, width: u32, height: u32) -> CaptureRequest {
    CaptureRequest::new(target, Rect::sized(width, height), PixelFormat::Rgba8)
}

fn solid(dst: &[u8], color: [u8; 4]) -> bool {
    dst.chunks_exact(4).all(|px| px == color)
}

fn pooled(device: &SoftwareDevice, buffers: u32, depth: u32) -> TexReader<SoftwareDevice> {
    TexReader::for_device(device, ReaderConfig::pooled(buffers, depth)).unwrap()
}

#[test]
fn pool_is_sized_to_the_request() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut reader = pooled(&device, 3, 1);
    let request = rgba(CaptureTarget::Surface, 4, 2);
    let mut dst = vec![0u8; request.byte_len()];
    reader.download(&mut device, &request, &mut dst).unwrap();

    let state = reader.pool_state();
    assert!(state.allocated);
    assert_eq!(state.buffer_count, 3);
    assert_eq!(state.capacity, 4 * 2 * 4);
    assert_eq!(device.live_buffers(), 3);

    // A different size reallocates the whole ring.
    let request = rgba(CaptureTarget::Surface, 8, 8);
    let mut dst = vec![0u8; request.byte_len()];
    reader.download(&mut device, &request, &mut dst).unwrap();
    let state = reader.pool_state();
    assert_eq!(state.capacity, 256);
    // The new ring starts over: one copy issued, cursor one past the start.
    assert_eq!(state.issued, 1);
    assert_eq!(state.cursor, 1 % 3);
    assert_eq!(device.stats().buffers_created, 6);
    assert_eq!(device.live_buffers(), 3);
}

#[test]
fn ring_cursor_stays_consistent_across_calls() {
    let mut device = SoftwareDevice::new(2, 2);
    for buffers in 1..=4 {
        for depth in 1..=3 {
            let mut reader = pooled(&device, buffers, depth);
            let request = rgba(CaptureTarget::Surface, 2, 2);
            let mut dst = vec![0u8; 16];
            for _ in 0..7 {
                reader.download(&mut device, &request, &mut dst).unwrap();
                let state = reader.pool_state();
                assert!(state.cursor < state.buffer_count);
                assert_eq!(state.cursor, state.issued as usize % state.buffer_count);
            }
            reader.shutdown_pool(&mut device);
        }
    }
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn warmup_delivers_nothing_until_every_buffer_was_filled() {
    let colors = [
        [10, 0, 0, 255],
        [20, 0, 0, 255],
        [30, 0, 0, 255],
        [40, 0, 0, 255],
        [50, 0, 0, 255],
    ];
    let mut device = SoftwareDevice::new(2, 2);
    let mut reader = pooled(&device, 3, 1);
    let request = rgba(CaptureTarget::Surface, 2, 2);
    let mut dst = vec![0u8; 16];

    for color in &colors[..3] {
        device.fill_surface(*color);
        let report = reader.download(&mut device, &request, &mut dst).unwrap();
        assert_eq!(report.issued, 1);
        assert!(!report.has_pixels());
        assert!(dst.iter().all(|&b| b == 0));
    }
    assert_eq!(device.stats().maps, 0);

    device.fill_surface(colors[3]);
    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.delivered, 1);
    assert!(solid(&dst, colors[0]));

    device.fill_surface(colors[4]);
    reader.download(&mut device, &request, &mut dst).unwrap();
    assert!(solid(&dst, colors[1]));
}

#[test]
fn pooled_round_trip_of_a_solid_texture() {
    let mut device = SoftwareDevice::new(1, 1);
    let texture = device.register_texture(4, 4);
    device.fill_texture(texture, RED).unwrap();
    let mut reader = pooled(&device, 2, 2);
    let request = rgba(CaptureTarget::Texture(texture), 4, 4);
    let mut dst = vec![0u8; 64];

    reader.download(&mut device, &request, &mut dst).unwrap();
    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(dst.len(), 64);
    assert!(solid(&dst, RED));
    assert_eq!(device.live_offscreen(), 0);
    assert!(!device.has_bound_offscreen());
}

#[test]
fn solid_blue_surface_after_one_warmup_call() {
    let mut device = SoftwareDevice::new(2, 2);
    device.fill_surface(BLUE);
    let mut reader = pooled(&device, 2, 2);
    let request = rgba(CaptureTarget::Surface, 2, 2);
    let mut dst = vec![0u8; 16];

    let first = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(first.issued, 2);
    assert_eq!(first.delivered, 0);
    assert_eq!(dst, vec![0u8; 16]);

    let second = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(second.delivered, 2);
    assert!(solid(&dst, BLUE));
}

#[test]
fn failed_texture_bind_leaves_no_target_behind() {
    let mut device = SoftwareDevice::new(1, 1).with_offscreen_limit(1);
    let texture = device.register_texture(2, 2);
    device.fill_texture(texture, RED).unwrap();
    let mut reader = TexReader::for_device(&device, ReaderConfig::direct()).unwrap();
    let mut dst = vec![0u8; 16];

    let err = reader
        .download(
            &mut device,
            &rgba(CaptureTarget::Texture(TextureId(99)), 2, 2),
            &mut dst,
        )
        .unwrap_err();
    assert!(matches!(err, ReadbackError::Offscreen { .. }));
    assert_eq!(err.kind(), ErrorKind::Target);
    assert_eq!(device.live_offscreen(), 0);
    assert!(!device.has_bound_offscreen());

    // With a single handle available this only works if the failed call released its target.
    reader
        .download(&mut device, &rgba(CaptureTarget::Texture(texture), 2, 2), &mut dst)
        .unwrap();
    assert!(solid(&dst, RED));
    assert_eq!(device.live_offscreen(), 0);
}

#[test]
fn deleted_texture_is_reported_as_incomplete() {
    let mut device = SoftwareDevice::new(1, 1);
    let texture = device.register_texture(2, 2);
    device.remove_texture(texture);
    let mut reader = TexReader::for_device(&device, ReaderConfig::direct()).unwrap();
    let mut dst = vec![0u8; 16];
    let err = reader
        .download(&mut device, &rgba(CaptureTarget::Texture(texture), 2, 2), &mut dst)
        .unwrap_err();
    assert!(matches!(err, ReadbackError::Offscreen { .. }));
    assert_eq!(device.live_offscreen(), 0);
}

#[test]
fn shutdown_is_idempotent_and_pool_reallocates_afterwards() {
    let mut device = SoftwareDevice::new(2, 2);
    let mut reader = pooled(&device, 2, 1);
    let request = rgba(CaptureTarget::Surface, 2, 2);
    let mut dst = vec![0u8; 16];
    reader.download(&mut device, &request, &mut dst).unwrap();

    reader.shutdown_pool(&mut device);
    reader.shutdown_pool(&mut device);
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.stats().buffers_destroyed, 2);
    assert!(!reader.pool_state().allocated);

    reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(reader.pool_state().issued, 1);
    assert_eq!(device.live_buffers(), 2);
}

#[test]
fn shutdown_without_allocation_is_a_no_op() {
    let mut device = SoftwareDevice::new(2, 2);
    let mut reader = pooled(&device, 2, 1);
    reader.shutdown_pool(&mut device);
    assert_eq!(device.stats().buffers_destroyed, 0);
}

#[test]
fn mapping_failure_keeps_previous_pixels() {
    let mut device = SoftwareDevice::new(2, 2);
    device.fill_surface(RED);
    let mut reader = pooled(&device, 1, 1);
    let request = rgba(CaptureTarget::Surface, 2, 2);
    let mut dst = vec![0u8; 16];

    reader.download(&mut device, &request, &mut dst).unwrap();
    reader.download(&mut device, &request, &mut dst).unwrap();
    assert!(solid(&dst, RED));

    device.fill_surface(BLUE);
    device.fail_next_maps(1);
    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.delivered, 0);
    assert!(solid(&dst, RED));
    // The ring kept moving.
    assert_eq!(reader.pool_state().issued, 3);

    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.delivered, 1);
    assert!(solid(&dst, BLUE));
}

#[test]
fn failed_copy_after_a_drain_keeps_the_delivered_frame() {
    let mut device = SoftwareDevice::new(2, 2);
    device.fill_surface(RED);
    let mut reader = pooled(&device, 1, 1);
    let request = rgba(CaptureTarget::Surface, 2, 2);
    let mut dst = vec![0u8; 16];
    reader.download(&mut device, &request, &mut dst).unwrap();

    device.fill_surface(BLUE);
    device.fail_next_copies(1);
    let err = reader.download(&mut device, &request, &mut dst).unwrap_err();
    assert!(matches!(err, ReadbackError::Copy(_)));
    assert!(solid(&dst, RED));
    assert_eq!(reader.pool_state().issued, 1);
    assert!(!device.has_bound_offscreen());

    // The buffer was drained but never refilled, so its next turn is stale.
    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.delivered, 0);
    assert!(solid(&dst, RED));

    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.delivered, 1);
    assert!(solid(&dst, BLUE));
}

#[test]
fn waits_on_fences_only_when_the_device_lags() {
    let mut device = SoftwareDevice::new(2, 2);
    let mut reader = pooled(&device, 2, 1);
    let request = rgba(CaptureTarget::Surface, 2, 2);
    let mut dst = vec![0u8; 16];

    for _ in 0..4 {
        reader.download(&mut device, &request, &mut dst).unwrap();
    }
    assert_eq!(device.stats().fence_waits, 2);

    let waits = device.stats().fence_waits;
    for _ in 0..4 {
        device.finish_frame();
        reader.download(&mut device, &request, &mut dst).unwrap();
    }
    assert_eq!(device.stats().fence_waits, waits);
    assert_eq!(device.stats().maps, 6);
}

#[test]
fn copy_failure_restores_bindings() {
    let mut device = SoftwareDevice::new(2, 2);
    let texture = device.register_texture(2, 2);
    let mut reader = pooled(&device, 2, 2);
    // The rectangle is larger than the texture, so the copy itself fails.
    let request = rgba(CaptureTarget::Texture(texture), 4, 4);
    let mut dst = vec![0u8; 64];

    let err = reader.download(&mut device, &request, &mut dst).unwrap_err();
    assert!(matches!(err, ReadbackError::Copy(_)));
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(device.live_offscreen(), 0);
    assert!(!device.has_bound_offscreen());
    assert_eq!(
        device.stats().offscreen_created,
        device.stats().offscreen_destroyed
    );
}

#[test]
fn direct_download_reads_an_offset_region() {
    let mut device = SoftwareDevice::new(4, 4);
    device.set_surface_pixel(2, 1, RED).unwrap();
    let mut reader = TexReader::for_device(&device, ReaderConfig::direct()).unwrap();
    let request = CaptureRequest::new(
        CaptureTarget::Surface,
        Rect::new(2, 1, 1, 2),
        PixelFormat::Red8,
    )
    .with_reverse_rows(true);
    let mut dst = vec![7u8; 2];

    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.strategy, Strategy::Direct);
    assert_eq!(dst, vec![0, 255]);
    assert_eq!(device.stats().direct_reads, 1);
    assert_eq!(device.stats().binding_restores, 1);
}

#[test]
fn direct_override_bypasses_the_pool() {
    let mut device = SoftwareDevice::new(2, 2);
    device.fill_surface(BLUE);
    let mut reader = pooled(&device, 2, 2);
    let mut dst = vec![0u8; 16];
    let report = reader
        .download_direct(&mut device, &rgba(CaptureTarget::Surface, 2, 2), &mut dst)
        .unwrap();
    assert!(report.has_pixels());
    assert!(solid(&dst, BLUE));
    assert!(!reader.pool_state().allocated);
}

#[test]
fn incomplete_surface_is_a_target_error() {
    let mut device = SoftwareDevice::new(2, 2);
    device.set_surface_complete(false);
    let mut reader = pooled(&device, 2, 1);
    let mut dst = vec![0u8; 16];
    let err = reader
        .download(&mut device, &rgba(CaptureTarget::Surface, 2, 2), &mut dst)
        .unwrap_err();
    assert!(matches!(err, ReadbackError::IncompleteTarget { .. }));
    assert_eq!(err.kind(), ErrorKind::Target);
    assert_eq!(device.stats().copies_issued, 0);
}

#[test]
fn pooled_path_requires_buffer_mapping() {
    let mut device = SoftwareDevice::new(2, 2).without_buffer_mapping();
    let err = TexReader::for_device(&device, ReaderConfig::pooled(2, 2))
        .err()
        .unwrap();
    assert!(matches!(err, ReadbackError::MappingUnsupported));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let mut reader = TexReader::for_device(&device, ReaderConfig::direct()).unwrap();
    assert!(matches!(
        reader.configure(2, 2),
        Err(ReadbackError::MappingUnsupported)
    ));
    let mut dst = vec![0u8; 16];
    let request = rgba(CaptureTarget::Surface, 2, 2);
    assert!(reader
        .download_with(Strategy::Pooled, &mut device, &request, &mut dst)
        .is_err());
    // Falling back to the direct path still works.
    assert!(reader.download(&mut device, &request, &mut dst).is_ok());
}

#[test]
fn disabled_pool_falls_back_to_direct_reads() {
    let mut device = SoftwareDevice::new(2, 2);
    device.fill_surface(BLUE);
    let mut reader = pooled(&device, 3, 1);
    let request = rgba(CaptureTarget::Surface, 2, 2);
    let mut dst = vec![0u8; 16];

    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.delivered, 0);
    assert!(reader.pool_state().allocated);

    reader.disable_pool();
    assert_eq!(reader.config().strategy(), Strategy::Direct);
    let report = reader.download(&mut device, &request, &mut dst).unwrap();
    assert_eq!(report.strategy, Strategy::Direct);
    assert_eq!(report.delivered, 1);
    assert!(solid(&dst, BLUE));

    // Buffers stay around until the explicit shutdown.
    assert!(reader.pool_state().allocated);
    reader.shutdown_pool(&mut device);
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn destination_length_must_match_request() {
    let mut device = SoftwareDevice::new(2, 2);
    let mut reader = pooled(&device, 2, 1);
    let request =
        CaptureRequest::new(CaptureTarget::Surface, Rect::sized(2, 2), PixelFormat::Rgb8);
    let mut dst = vec![0u8; 16];
    let err = reader.download(&mut device, &request, &mut dst).unwrap_err();
    assert!(matches!(
        err,
        ReadbackError::DestinationSize {
            expected: 12,
            actual: 16
        }
    ));
    assert!(!reader.pool_state().allocated);
}

#[test]
fn reconfigured_buffer_count_reallocates() {
    let mut device = SoftwareDevice::new(2, 2);
    let mut reader = pooled(&device, 2, 1);
    let request = rgba(CaptureTarget::Surface, 2, 2);
    let mut dst = vec![0u8; 16];
    reader.download(&mut device, &request, &mut dst).unwrap();

    reader.configure(4, 1).unwrap();
    reader.download(&mut device, &request, &mut dst).unwrap();
    let state = reader.pool_state();
    assert_eq!(state.buffer_count, 4);
    assert_eq!(state.issued, 1);
    assert_eq!(device.live_buffers(), 4);
}

#[test]
fn allocation_failure_surfaces_as_resource_error() {
    let mut device = SoftwareDevice::new(2, 2);
    device.fail_allocations_after(1);
    let mut reader = pooled(&device, 3, 1);
    let mut dst = vec![0u8; 16];
    let err = reader
        .download(&mut device, &rgba(CaptureTarget::Surface, 2, 2), &mut dst)
        .unwrap_err();
    assert!(matches!(err, ReadbackError::Allocation { count: 3, .. }));
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(device.live_buffers(), 0);
    assert!(!reader.pool_state().allocated);
}
