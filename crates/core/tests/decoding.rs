mod common;

use common::{config, red_at, write_png, write_split_png, FlakyCodec, RecordingConsumer, TIMEOUT};
use image::DynamicImage;
use imgloader_core::{
    Bitmap, FileLocation, ImageLoader, ImageLocation, ImageRequest, MediaDir, NoMediaProvider,
    ScaleRequest,
};
use std::path::Path;
use std::sync::Arc;

fn full_request(local_id: i32, filter: &str) -> ImageRequest {
    ImageRequest {
        image: Some(ImageLocation::File(FileLocation::new(100, local_id))),
        filter: Some(filter.to_string()),
        size: 4096,
        ..ImageRequest::default()
    }
}

fn thumb_request(local_id: i32, filter: &str) -> ImageRequest {
    ImageRequest {
        thumb: Some(FileLocation::new(3, local_id)),
        thumb_filter: Some(filter.to_string()),
        ..ImageRequest::default()
    }
}

fn load_one(loader: &ImageLoader, request: ImageRequest) -> Bitmap {
    let consumer = RecordingConsumer::new(request);
    loader.load_image_for(consumer.clone());
    assert!(loader.wait_idle(TIMEOUT));
    let deliveries = consumer.deliveries();
    assert_eq!(deliveries.len(), 1);
    deliveries[0]
        .image
        .as_bitmap()
        .cloned()
        .expect("static raster expected")
}

fn flaky_loader(root: &Path, codec: Arc<FlakyCodec>) -> ImageLoader {
    ImageLoader::new(config(root), codec, Arc::new(NoMediaProvider), None)
}

#[test]
fn wide_source_is_rescaled_to_the_exact_filter_width() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()));
    write_png(&loader.dirs().path(MediaDir::Image, "100_5.jpg"), 300, 200);

    // 300 / 80 samples by two to 150x100, which still overshoots the filter
    let bitmap = load_one(&loader, full_request(5, "80_80"));
    assert_eq!((bitmap.width(), bitmap.height()), (80, 53));
}

#[test]
fn legacy_mode_keeps_the_sampled_size() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()).with_legacy_purgeable(true));
    write_png(&loader.dirs().path(MediaDir::Image, "100_5.jpg"), 300, 200);

    let bitmap = load_one(&loader, full_request(5, "80_80"));
    assert_eq!((bitmap.width(), bitmap.height()), (150, 100));
}

#[test]
fn legacy_mode_pins_unblurred_rasters() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()));
    write_png(&loader.dirs().path(MediaDir::Image, "100_5.jpg"), 40, 40);
    assert!(!load_one(&loader, full_request(5, "80_80")).is_pinned());

    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()).with_legacy_purgeable(true));
    write_png(&loader.dirs().path(MediaDir::Image, "100_5.jpg"), 40, 40);
    assert!(load_one(&loader, full_request(5, "80_80")).is_pinned());
}

#[test]
fn small_full_image_with_blur_filter_is_softened() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()).with_legacy_purgeable(true));
    write_split_png(&loader.dirs().path(MediaDir::Image, "100_6.jpg"), 60, 40);
    write_split_png(&loader.dirs().path(MediaDir::Image, "100_7.jpg"), 60, 40);

    let blurred = load_one(&loader, full_request(6, "80_80_b"));
    let sharp = load_one(&loader, full_request(7, "80_80"));

    // Column 29 is the last white one
    assert!(red_at(&blurred, 29, 20) < 255);
    assert_eq!(red_at(&sharp, 29, 20), 255);
    assert!(!blurred.is_pinned());
    assert!(sharp.is_pinned());
}

#[test]
fn heavy_thumbnail_blur_reaches_further_than_light() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()).with_legacy_purgeable(true));
    write_split_png(&loader.dirs().path(MediaDir::Cache, "3_4.jpg"), 60, 40);
    write_split_png(&loader.dirs().path(MediaDir::Cache, "3_5.jpg"), 60, 40);

    let heavy = load_one(&loader, thumb_request(4, "50_50_b2"));
    let light = load_one(&loader, thumb_request(5, "50_50_b1"));
    assert!(loader.is_in_cache("3_4@50_50_b2"));

    // Eight columns away from the edge only the heavy blur reaches
    assert!(red_at(&heavy, 22, 20) < 255);
    assert_eq!(red_at(&light, 22, 20), 255);
    assert!(red_at(&light, 29, 20) < 255);
    assert!(!heavy.is_pinned());
    assert!(!light.is_pinned());
}

#[test]
fn decode_out_of_memory_clears_the_cache_and_retries_once() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let codec = FlakyCodec::new(1, 0);
    let loader = flaky_loader(temp.path(), codec.clone());
    loader.cache().put("victim", Bitmap::new(DynamicImage::new_rgb8(16, 16)));
    write_png(&loader.dirs().path(MediaDir::Image, "100_5.jpg"), 40, 40);

    let bitmap = load_one(&loader, full_request(5, "80_80"));
    assert_eq!((bitmap.width(), bitmap.height()), (40, 40));
    assert_eq!(codec.decodes(), 2);
    assert!(!loader.is_in_cache("victim"));
    assert!(loader.is_in_cache("100_5@80_80"));
}

#[test]
fn second_out_of_memory_fails_the_load() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let codec = FlakyCodec::new(2, 0);
    let loader = flaky_loader(temp.path(), codec.clone());
    write_png(&loader.dirs().path(MediaDir::Image, "100_5.jpg"), 40, 40);

    let consumer = RecordingConsumer::new(full_request(5, "80_80"));
    loader.load_image_for(consumer.clone());
    assert!(loader.wait_idle(TIMEOUT));

    assert_eq!(codec.decodes(), 2);
    assert!(consumer.deliveries().is_empty());
    assert_eq!(consumer.failures().len(), 1);
}

#[test]
fn scale_and_save_out_of_memory_clears_the_cache_and_retries_once() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let codec = FlakyCodec::new(0, 1);
    let loader = flaky_loader(temp.path(), codec.clone());
    loader.cache().put("victim", Bitmap::new(DynamicImage::new_rgb8(16, 16)));

    let source = Bitmap::new(DynamicImage::new_rgb8(400, 200));
    let saved = loader
        .scale_and_save(&source, &ScaleRequest::new(200.0, 200.0, 80))
        .expect("retry should write the copy");
    assert_eq!((saved.width, saved.height), (200, 100));
    assert!(saved.path.exists());
    assert_eq!(codec.encodes(), 2);
    assert!(!loader.is_in_cache("victim"));
}
