mod common;

use texcopy::{
    plan, run_case, CheckMethod, EngineError, Extent3d, InitMethod, LinearLayout, Origin3d,
    RunCase, Suite, SurfaceCopy, SurfaceDesc, TextureDimension, TextureFormat, TransferEngine,
};

fn run_suite(test_name: &str, suite: Suite) {
    let Some(mut engine) = common::wgpu_engine(test_name) else {
        return;
    };
    let plan = plan(suite, &*engine).unwrap();
    for case in &plan.runnable {
        let outcome = pollster::block_on(run_case(&mut *engine, case))
            .unwrap_or_else(|err| panic!("{case}: {err}"));
        assert!(outcome.passed(), "{case}: {:?}", outcome.report.mismatches);
    }
}

#[test]
fn wgpu_copy_whole_texture() {
    run_suite(module_path!(), Suite::CopyWholeTexture);
}

#[test]
fn wgpu_copy_with_padding() {
    run_suite(module_path!(), Suite::CopyWithPadding);
}

#[test]
fn wgpu_copy_empty_extent() {
    run_suite(module_path!(), Suite::CopyEmptyExtent);
}

#[test]
fn wgpu_copy_region_with_origin() {
    run_suite(module_path!(), Suite::CopyRegionWithOrigin);
}

#[test]
fn wgpu_copy_mip_levels() {
    run_suite(module_path!(), Suite::CopyMipLevels);
}

#[test]
fn wgpu_all_formats() {
    run_suite(module_path!(), Suite::AllFormats);
}

#[test]
fn wgpu_compressed_array_images_use_texel_row_strides() {
    let Some(mut engine) = common::wgpu_engine(module_path!()) else {
        return;
    };
    let format = TextureFormat::Bc1RgbaUnorm;
    if !engine.supports_format(format) {
        common::skip_or_panic(module_path!(), "adapter cannot round-trip BC formats");
        return;
    }
    // 8 texel rows per image is 2 block rows, so each layer spans 512 bytes.
    for init in InitMethod::ALL {
        for check in CheckMethod::ALL {
            let case = RunCase::whole(
                format,
                Extent3d::new(8, 8, 2),
                LinearLayout::new(0, 256, 8),
                init,
                check,
            );
            let outcome = pollster::block_on(run_case(&mut *engine, &case))
                .unwrap_or_else(|err| panic!("{case}: {err}"));
            assert!(outcome.passed(), "{case}: {:?}", outcome.report.mismatches);
        }
    }
}

#[test]
fn wgpu_requires_aligned_rows_for_buffer_copies() {
    let Some(engine) = common::wgpu_engine(module_path!()) else {
        return;
    };
    let limits = engine.limits();
    assert_eq!(limits.bytes_per_row_alignment, 256);
    assert!(limits.block_aligned_buffer_offset);

    let skipped = plan(Suite::CopyWithPadding, &*engine).unwrap().skipped;
    assert!(skipped
        .iter()
        .all(|case| case.layout.bytes_per_row % 256 != 0
            || case.layout.offset % u64::from(case.format.info().bytes_per_block) != 0
            || !engine.supports_format(case.format)
            || !engine.supports_dimension(case.dimension)));
}

#[test]
fn wgpu_rejects_undersized_readback_buffer() {
    let Some(mut engine) = common::wgpu_engine(module_path!()) else {
        return;
    };
    let surface = engine
        .create_surface(&SurfaceDesc {
            label: Some("undersized".into()),
            size: Extent3d::new(4, 4, 1),
            mip_level_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
        })
        .unwrap();
    let copy = SurfaceCopy {
        surface,
        mip_level: 0,
        origin: Origin3d::ZERO,
    };
    let err = engine
        .copy_surface_into_linear(
            &copy,
            &LinearLayout::new(0, 256, 4),
            Extent3d::new(4, 4, 1),
            256 * 3,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(ref msg) if msg.contains("need 784")));
    engine.destroy_surface(surface).unwrap();
}
