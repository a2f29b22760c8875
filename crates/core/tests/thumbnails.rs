mod common;

use common::{config, write_png, RecordingConsumer, TIMEOUT};
use imgloader_core::{
    FileLocation, ImageLoader, ImageRequest, MediaAttachment, MediaType, Notification, Slot,
    SlotSelection,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

fn quality_request(media: MediaAttachment) -> ImageRequest {
    ImageRequest {
        thumb: Some(FileLocation::new(3, 4)),
        needs_quality_thumb: true,
        should_generate_quality_thumb: true,
        media: Some(media),
        ..ImageRequest::default()
    }
}

fn photo(file_name: &str, path: PathBuf) -> MediaAttachment {
    MediaAttachment {
        media_type: MediaType::Image,
        file_name: file_name.to_string(),
        attach_path: None,
        stored_path: path,
    }
}

#[test]
fn quality_thumbnail_is_generated_published_and_announced() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()));
    let original = temp.path().join("original.png");
    write_png(&original, 400, 300);

    let announced = Arc::new(Mutex::new(Vec::new()));
    let sink = announced.clone();
    loader.notifications().subscribe(move |notification| {
        if let Notification::ThumbGenerated { key, .. } = notification {
            sink.lock().push(key.clone());
        }
    });

    let consumer = RecordingConsumer::new(quality_request(photo("photo_3_4.jpg", original)));
    loader.load_image_for(consumer.clone());
    assert!(loader.wait_idle(TIMEOUT));

    let thumb_file = loader.dirs().quality_thumb_path(3, 4);
    assert!(thumb_file.ends_with("q_3_4.jpg"));
    assert!(thumb_file.exists());
    assert!(loader.is_in_cache("3_4"));
    assert_eq!(*announced.lock(), vec!["3_4".to_string()]);

    // The regular thumbnail still waits for its download
    let stats = loader.loading_stats();
    assert_eq!(stats.by_url, 1);
    assert_eq!(stats.waiting_for_quality_thumb, 1);
    assert_eq!(stats.generating_thumbs, 0);

    loader.cancel_loading_for(consumer.id(), SlotSelection::ThumbOnly);
    assert!(loader.loading_stats().is_empty());
}

#[test]
fn generated_thumbnail_fits_the_quality_bound() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()).with_display_size(400, 800));
    let original = temp.path().join("wide.png");
    write_png(&original, 600, 300);

    let consumer = RecordingConsumer::new(quality_request(photo("wide.jpg", original)));
    loader.load_image_for(consumer.clone());
    assert!(loader.wait_idle(TIMEOUT));

    // 400 / 4 = 100: the short side lands on the bound
    let bitmap = loader.cache().get("3_4").expect("thumbnail should be cached");
    assert_eq!(bitmap.height(), 100);
    assert_eq!(bitmap.width(), 200);
}

#[test]
fn existing_quality_thumbnail_is_decoded_directly() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()));
    write_png(&loader.dirs().quality_thumb_path(3, 4), 90, 60);

    let request = ImageRequest {
        thumb: Some(FileLocation::new(3, 4)),
        needs_quality_thumb: true,
        ..ImageRequest::default()
    };
    let consumer = RecordingConsumer::new(request);
    loader.load_image_for(consumer.clone());
    assert!(loader.wait_idle(TIMEOUT));

    let deliveries = consumer.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].key, "3_4");
    assert_eq!(deliveries[0].slot, Slot::Thumb);
    assert!(loader.loading_stats().is_empty());
}

#[test]
fn downloaded_media_triggers_waiting_thumbnail_generation() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()));
    let original = temp.path().join("later.png");

    let consumer = RecordingConsumer::new(quality_request(photo("later.jpg", original.clone())));
    loader.load_image_for(consumer.clone());

    let stats = loader.loading_stats();
    assert_eq!(stats.waiting_for_quality_thumb, 1);
    assert_eq!(stats.generating_thumbs, 0);

    write_png(&original, 240, 240);
    loader.file_did_load("later.jpg", &original);
    assert!(loader.wait_idle(TIMEOUT));

    assert!(loader.dirs().quality_thumb_path(3, 4).exists());
    assert_eq!(loader.loading_stats().waiting_for_quality_thumb, 0);
}

#[test]
fn wait_record_belongs_to_the_consumer_that_started_the_load() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()));
    let missing = temp.path().join("never.png");

    let first = RecordingConsumer::new(quality_request(photo("never.jpg", missing.clone())));
    let second = RecordingConsumer::new(quality_request(photo("never.jpg", missing)));
    loader.load_image_for(first.clone());
    loader.load_image_for(second.clone());

    let stats = loader.loading_stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.waiting_for_quality_thumb, 1);

    loader.cancel_loading_for(first.id(), SlotSelection::Both);
    let stats = loader.loading_stats();
    assert_eq!(stats.waiting_for_quality_thumb, 0);
    assert_eq!(stats.entries, 1, "the second consumer keeps the entry alive");

    loader.cancel_loading_for(second.id(), SlotSelection::Both);
    assert!(loader.loading_stats().is_empty());
}

#[test]
fn local_thumbnail_still_waits_for_its_quality_copy() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let loader = ImageLoader::with_defaults(config(temp.path()));
    let pending = temp.path().join("pending.png");

    let request = ImageRequest {
        thumb: Some(FileLocation::new(3, 4).with_local_path(&pending)),
        needs_quality_thumb: true,
        media: Some(photo("pending.jpg", temp.path().join("pending-original.png"))),
        ..ImageRequest::default()
    };
    let consumer = RecordingConsumer::new(request);
    loader.load_image_for(consumer.clone());

    let stats = loader.loading_stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.by_url, 1);
    assert_eq!(stats.waiting_for_quality_thumb, 1);

    loader.cancel_loading_for(consumer.id(), SlotSelection::Both);
    assert!(loader.loading_stats().is_empty());
}
