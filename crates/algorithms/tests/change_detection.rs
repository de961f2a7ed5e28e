//! End-to-end properties of the change-detection pipeline.

use changemap_algorithms::change::{
    count_changed, detect_changes, difference_image, sample_blocks, ChannelRule, PipelineConfig,
};
use changemap_algorithms::classification::{
    eigen_basis, project_features, two_means, ComponentSelection, EigenParams, InitStrategy,
    KmeansParams, LazyFeatures,
};
use changemap_algorithms::morphology::StructuringElement;
use changemap_core::raster::{Image, Raster, Window};
use changemap_core::Error;

/// 8x8 zero image and a copy with a 4x4 block of `value` in the top-left corner
fn corner_pair(value: f64) -> (Image, Image) {
    let before = Image::single(Raster::filled(8, 8, 0.0));
    let after = Image::single(Raster::from_fn(8, 8, |r, c| if r < 4 && c < 4 { value } else { 0.0 }));
    (before, after)
}

/// Smooth background with a bright rectangle added in `after`
fn textured_pair(rows: usize, cols: usize) -> (Image, Image) {
    let base = |r: usize, c: usize| ((r * 7 + c * 11) % 13) as f64 * 0.1;
    let before = Image::single(Raster::from_fn(rows, cols, base));
    let after = Image::single(Raster::from_fn(rows, cols, |r, c| {
        let inside = r >= rows / 3 && r < 2 * rows / 3 && c >= cols / 4 && c < cols / 2;
        base(r, c) + if inside { 20.0 } else { 0.0 }
    }));
    (before, after)
}

fn corner_mask() -> Raster<u8> {
    Raster::from_fn(8, 8, |r, c| u8::from(r < 4 && c < 4))
}

#[test]
fn corner_block_is_detected_exactly() {
    let (before, after) = corner_pair(100.0);
    let config = PipelineConfig { window: 2, ..Default::default() };
    let run = detect_changes(&before, &after, &config).unwrap();

    for r in 0..8 {
        for c in 0..8 {
            let d = run.difference.get(r, c).unwrap();
            assert_eq!(d != 0.0, r < 4 && c < 4, "difference at ({r}, {c}) = {d}");
        }
    }
    assert_eq!(run.change_map, corner_mask());
    assert_eq!(run.cleaned, run.change_map);
    assert_eq!(run.report.changed_pixels, 16);
    assert_eq!(run.report.changed_pixels_clean, 16);
    assert!(run.report.converged);
    assert!(!run.report.degenerate);
}

#[test]
fn corner_block_is_detected_at_any_scale() {
    let config = PipelineConfig { window: 2, ..Default::default() };
    for value in [1e-3, 1e-6, 1e-13, 1e6] {
        let (before, after) = corner_pair(value);
        let run = detect_changes(&before, &after, &config).unwrap();
        assert!(run.report.ridge_applied.is_none(), "ridge applied at {value:e}");
        assert_eq!(run.report.components, 1, "components at {value:e}");
        assert!(!run.report.degenerate, "degenerate at {value:e}");
        assert_eq!(run.assignment.counts(), [48, 16], "cluster sizes at {value:e}");
        assert_eq!(run.change_map, corner_mask(), "change map at {value:e}");
        assert_eq!(run.report.changed_pixels_clean, 16);
    }
}

#[test]
fn identical_images_change_nothing() {
    let (before, _) = textured_pair(10, 10);
    let run = detect_changes(&before, &before, &PipelineConfig::default()).unwrap();
    assert!(run.difference.data().iter().all(|&v| v == 0.0));
    assert_eq!(count_changed(&run.cleaned), 0);
    assert_eq!(count_changed(&run.change_map), 0);
    assert!(run.report.degenerate);
    assert!(run.report.ridge_applied.is_some());
}

#[test]
fn three_by_three_with_even_window() {
    let before = Image::single(Raster::from_fn(3, 3, |r, c| (r * 3 + c) as f64));
    let after = Image::single(Raster::from_fn(3, 3, |r, c| if r == 2 && c == 2 { 30.0 } else { (r * 3 + c) as f64 }));
    let config = PipelineConfig { window: 2, morph_iterations: 0, ..Default::default() };
    let run = detect_changes(&before, &after, &config).unwrap();
    assert_eq!(run.blocks.len(), 4);
    assert_eq!(run.blocks.dim(), 4);
    assert_eq!(run.change_map.shape(), (3, 3));

    // Every pixel of the difference image appears in some padded tile
    let diff = difference_image(&before, &after, ChannelRule::Mean).unwrap();
    let blocks = sample_blocks(&diff, Window::new(2).unwrap()).unwrap();
    assert!(blocks.blocks().iter().any(|&v| v == 22.0));
}

#[test]
fn basis_is_orthonormal_and_ordered() {
    let (before, after) = textured_pair(20, 18);
    let diff = difference_image(&before, &after, ChannelRule::Mean).unwrap();
    let blocks = sample_blocks(&diff, Window::new(3).unwrap()).unwrap();
    let params = EigenParams { selection: ComponentSelection::Count(9), ..Default::default() };
    let basis = eigen_basis(&blocks, &params).unwrap();

    assert!(basis.orthonormality_error() < 1e-6);
    for i in 0..basis.components() {
        for j in 0..basis.components() {
            let dot: f64 = basis.vector(i).iter().zip(basis.vector(j).iter()).map(|(a, b)| a * b).sum();
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((dot - expected).abs() < 1e-6, "<v{i}, v{j}> = {dot}");
        }
    }
    let values = basis.eigenvalues();
    assert!(values.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn feature_space_has_one_vector_per_pixel() {
    let (before, after) = textured_pair(11, 13);
    let config = PipelineConfig { window: 3, components: ComponentSelection::Count(4), ..Default::default() };
    let run = detect_changes(&before, &after, &config).unwrap();
    let features = run.features.unwrap();
    assert_eq!(features.vectors().dim(), (11 * 13, 4));
    assert_eq!(run.assignment.labels.len(), 11 * 13);
}

#[test]
fn non_identical_features_give_two_labels() {
    let (before, after) = textured_pair(15, 15);
    let run = detect_changes(&before, &after, &PipelineConfig { window: 3, ..Default::default() }).unwrap();
    let [zeros, ones] = run.assignment.counts();
    assert!(zeros > 0 && ones > 0);
}

#[test]
fn cleanup_never_adds_changes() {
    let (before, after) = textured_pair(24, 24);
    for element in [
        StructuringElement::Square(1),
        StructuringElement::Cross(1),
        StructuringElement::Disk(2),
    ] {
        let config = PipelineConfig { window: 3, element, morph_iterations: 2, ..Default::default() };
        let run = detect_changes(&before, &after, &config).unwrap();
        assert!(run.report.changed_pixels_clean <= run.report.changed_pixels);
        for (clean, raw) in run.cleaned.data().iter().zip(run.change_map.data().iter()) {
            assert!(clean <= raw);
        }
    }
}

#[test]
fn fixed_seed_is_bit_identical() {
    let (before, after) = textured_pair(16, 20);
    for init in [InitStrategy::MeanFarthest, InitStrategy::RandomPair] {
        let config = PipelineConfig { window: 4, init, seed: 1234, ..Default::default() };
        let a = detect_changes(&before, &after, &config).unwrap();
        let b = detect_changes(&before, &after, &config).unwrap();
        assert_eq!(a.change_map, b.change_map);
        assert_eq!(a.cleaned, b.cleaned);
        assert_eq!(a.assignment, b.assignment);
    }
}

#[test]
fn streaming_matches_materialized() {
    let (before, after) = textured_pair(17, 12);
    let stored = PipelineConfig { window: 3, band_rows: 4, ..Default::default() };
    let streamed = PipelineConfig { streaming: true, ..stored.clone() };
    let a = detect_changes(&before, &after, &stored).unwrap();
    let b = detect_changes(&before, &after, &streamed).unwrap();
    assert_eq!(a.assignment.labels, b.assignment.labels);
    assert_eq!(a.change_map, b.change_map);

    // Same check one level down, with a band height that does not divide the rows
    let diff = &a.difference;
    let basis = eigen_basis(&a.blocks, &EigenParams::default()).unwrap();
    let fvs = project_features(diff, &basis, 5).unwrap();
    let lazy = LazyFeatures::new(diff, &basis, 5).unwrap();
    let params = KmeansParams::default();
    assert_eq!(two_means(&fvs, &params).unwrap().labels, two_means(&lazy, &params).unwrap().labels);
}

#[test]
fn multi_band_images() {
    let zero = Raster::filled(8, 8, 0.0);
    let before = Image::new(vec![zero.clone(), zero.clone()]).unwrap();
    let after = Image::new(vec![
        Raster::from_fn(8, 8, |r, c| if r < 4 && c < 4 { 30.0 } else { 0.0 }),
        Raster::from_fn(8, 8, |r, c| if r < 4 && c < 4 { -40.0 } else { 0.0 }),
    ])
    .unwrap();
    let config = PipelineConfig { window: 2, channel_rule: ChannelRule::Euclidean, ..Default::default() };
    let run = detect_changes(&before, &after, &config).unwrap();
    assert!((run.difference.get(0, 0).unwrap() - 50.0).abs() < 1e-9);
    assert_eq!(run.report.bands, 2);
    assert_eq!(run.change_map, corner_mask());
}

#[test]
fn mismatched_inputs_fail() {
    let before = Image::single(Raster::filled(8, 8, 0.0));
    let after = Image::single(Raster::filled(8, 7, 0.0));
    match detect_changes(&before, &after, &PipelineConfig::default()) {
        Err(Error::ShapeMismatch { stage, expected, actual }) => {
            assert_eq!(stage, "DifferenceImageBuilder");
            assert_eq!(expected, (8, 8, 1));
            assert_eq!(actual, (8, 7, 1));
        }
        other => panic!("expected ShapeMismatch, got {other:?}"),
    }
}

#[test]
fn component_rasters_cover_the_image() {
    let (before, after) = corner_pair(10.0);
    let config = PipelineConfig { window: 2, components: ComponentSelection::Count(2), ..Default::default() };
    let run = detect_changes(&before, &after, &config).unwrap();
    let features = run.features.unwrap();
    assert_eq!(features.component_raster(1).unwrap().shape(), (8, 8));
    assert_eq!(run.basis.variance_explained().len(), 2);
}
