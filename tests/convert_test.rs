mod common {
    pub mod test_utils;
}

use std::{fs, path::Path, sync::Arc};

use gltf_squash::{
    convert::{ConversionJob, TextureConverter},
    data_structures::{
        ids::{ImageId, TextureId},
        slots::{SlotKind, SlotPolicy},
    },
    error::ConvertError,
    optimiser::{Optimiser, Options},
    resources::ktx2::{is_ktx2_file, Uncompressed, VkFormat},
};
use serde_json::json;

use crate::common::test_utils::{
    ktx2_format, ktx2_supercompression, read_document, two_texture_scene, write_document, write_flat_roughness_png,
    write_gradient_png, write_normal_png, BasisLabelled,
};

fn options() -> Options {
    Options {
        worker_threads: 2,
        ..Default::default()
    }
}

fn scene_folder() -> tempfile::TempDir {
    let folder = tempfile::tempdir().unwrap();
    write_gradient_png(&folder.path().join("albedo.png"), 16, 8);
    write_normal_png(&folder.path().join("normal.png"), 8, 8);
    write_document(&folder.path().join("scene.gltf"), &two_texture_scene());
    folder
}

fn optimiser(options: Options) -> Optimiser {
    Optimiser::new(options).with_encoder(Arc::new(BasisLabelled))
}

fn converter(options: &Options) -> TextureConverter {
    TextureConverter::new(options, Arc::new(Uncompressed))
}

fn split_job(source: &Path) -> ConversionJob {
    let mut job = ConversionJob::new(
        source.to_path_buf(),
        ImageId(0),
        "mr.png",
        SlotKind::MetallicRoughness.policy(),
    );
    job.textures.push(TextureId(0));
    job
}

#[test]
fn textures_are_replaced_by_ktx2_files() {
    let folder = scene_folder();
    let scene = folder.path().join("scene.gltf");
    let output = folder.path().join("out.gltf");

    let report = optimiser(options()).pass(&scene, &output).unwrap();

    assert_eq!(report.prune.total(), 0);
    assert_eq!(report.textures.planned, 2);
    assert_eq!(report.textures.converted, 2);
    assert_eq!(report.textures.failed, 0);

    let albedo = folder.path().join("albedo.ktx2");
    let normal = folder.path().join("normal.ktx2");
    assert!(is_ktx2_file(&albedo));
    assert!(is_ktx2_file(&normal));
    assert_eq!(ktx2_format(&albedo), VkFormat::R8G8B8A8Srgb as u32);
    // Normal maps lose their alpha channel when renormalized.
    assert_eq!(ktx2_format(&normal), VkFormat::R8G8B8Unorm as u32);
    assert!(!folder.path().join("albedo.png").exists());
    assert!(!folder.path().join("normal.png").exists());

    let document = read_document(&output);
    assert_eq!(
        document["images"],
        json!([
            {"uri": "albedo.ktx2", "mimeType": "image/ktx2"},
            {"uri": "normal.ktx2", "mimeType": "image/ktx2"}
        ])
    );
    assert_eq!(
        document["textures"],
        json!([
            {"extensions": {"KHR_texture_basisu": {"source": 0}}},
            {"extensions": {"KHR_texture_basisu": {"source": 1}}}
        ])
    );
    assert_eq!(document["extensionsUsed"], json!(["KHR_texture_basisu"]));
    assert_eq!(document["extensionsRequired"], json!(["KHR_texture_basisu"]));
    assert!(document["asset"]["generator"].as_str().unwrap().starts_with("gltf-squash"));
    assert_eq!(document["materials"][0]["normalTexture"], json!({"index": 1, "scale": 1.0}));
}

#[test]
fn raw_payloads_are_written_but_not_linked() {
    let folder = scene_folder();
    let scene = folder.path().join("scene.gltf");
    let output = folder.path().join("out.gltf");

    let report = Optimiser::new(options()).pass(&scene, &output).unwrap();

    assert_eq!(report.textures.converted, 2);
    let albedo = folder.path().join("albedo.ktx2");
    assert!(is_ktx2_file(&albedo));
    assert_eq!(ktx2_format(&albedo), VkFormat::R8G8B8A8Srgb as u32);
    assert_eq!(ktx2_supercompression(&albedo), 3);
    assert!(folder.path().join("albedo.png").exists());
    assert!(folder.path().join("normal.png").exists());

    let document = read_document(&output);
    assert_eq!(document["images"], json!([{"uri": "albedo.png"}, {"uri": "normal.png"}]));
    assert_eq!(document["textures"], json!([{"source": 0}, {"source": 1}]));
    assert!(document.get("extensionsUsed").is_none());
    assert!(document.get("extensionsRequired").is_none());
}

#[test]
fn basis_payloads_skip_zlib() {
    let folder = scene_folder();
    let scene = folder.path().join("scene.gltf");

    optimiser(options()).pass(&scene, &scene).unwrap();

    assert_eq!(ktx2_supercompression(&folder.path().join("albedo.ktx2")), 0);
}

#[test]
fn sources_sharing_a_stem_get_separate_outputs() {
    let folder = tempfile::tempdir().unwrap();
    image::RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 0]))
        .save(folder.path().join("wood.png"))
        .unwrap();
    image::RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 255]))
        .save(folder.path().join("wood.jpg"))
        .unwrap();
    let mut document = two_texture_scene();
    document["images"] = json!([{"uri": "wood.png"}, {"uri": "wood.jpg"}]);
    document["materials"][0].as_object_mut().unwrap().remove("normalTexture");
    document["materials"][0]["emissiveTexture"] = json!({"index": 1});
    let scene = folder.path().join("scene.gltf");
    write_document(&scene, &document);
    let options = Options {
        keep_original_textures: true,
        ..options()
    };

    let report = optimiser(options.clone()).pass(&scene, &scene).unwrap();

    assert_eq!(report.textures.planned, 2);
    let plain = folder.path().join("wood.ktx2");
    let kept = folder.path().join("wood.jpg.ktx2");
    assert!(is_ktx2_file(&plain));
    assert!(is_ktx2_file(&kept));
    assert_ne!(fs::read(&plain).unwrap(), fs::read(&kept).unwrap());
    let document = read_document(&scene);
    assert_eq!(document["images"][2]["uri"], "wood.ktx2");
    assert_eq!(document["images"][3]["uri"], "wood.jpg.ktx2");
    assert_eq!(document["textures"][0]["extensions"]["KHR_texture_basisu"]["source"], 2);
    assert_eq!(document["textures"][1]["extensions"]["KHR_texture_basisu"]["source"], 3);

    // Names are resolved the same way when the first texture is skipped
    let written = fs::read(&kept).unwrap();
    let report = optimiser(options).pass(&scene, &scene).unwrap();
    assert_eq!(report.textures.planned, 0);
    assert_eq!(fs::read(&kept).unwrap(), written);
}

#[test]
fn original_textures_can_be_kept_as_fallback() {
    let folder = scene_folder();
    let scene = folder.path().join("scene.gltf");
    let options = Options {
        keep_original_textures: true,
        ..options()
    };

    optimiser(options).pass(&scene, &scene).unwrap();

    assert!(folder.path().join("albedo.png").exists());
    assert!(folder.path().join("albedo.ktx2").exists());
    let document = read_document(&scene);
    assert_eq!(document["images"].as_array().unwrap().len(), 4);
    assert_eq!(
        document["images"][2],
        json!({"name": "albedo.png/basisu", "uri": "albedo.ktx2", "mimeType": "image/ktx2"})
    );
    assert_eq!(
        document["textures"][0],
        json!({"source": 0, "extensions": {"KHR_texture_basisu": {"source": 2}}})
    );
    assert_eq!(document["extensionsUsed"], json!(["KHR_texture_basisu"]));
    assert!(document.get("extensionsRequired").is_none());
}

#[test]
fn a_second_pass_changes_nothing() {
    let folder = scene_folder();
    let scene = folder.path().join("scene.gltf");
    let first = folder.path().join("first.gltf");
    let second = folder.path().join("second.gltf");
    let options = Options {
        keep_original_textures: true,
        ..options()
    };
    let optimiser = optimiser(options);

    optimiser.pass(&scene, &first).unwrap();
    let albedo = folder.path().join("albedo.ktx2");
    let written = fs::read(&albedo).unwrap();
    let modified = fs::metadata(&albedo).unwrap().modified().unwrap();

    let report = optimiser.pass(&first, &second).unwrap();

    assert_eq!(report.prune.total(), 0);
    assert_eq!(report.textures.planned, 0);
    assert_eq!(fs::read(&albedo).unwrap(), written);
    assert_eq!(fs::metadata(&albedo).unwrap().modified().unwrap(), modified);
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn existing_ktx2_files_are_reused_unless_replacing() {
    let folder = scene_folder();
    let albedo = folder.path().join("albedo.ktx2");
    fs::write(&albedo, b"stale").unwrap();
    let scene = folder.path().join("scene.gltf");

    let options = Options {
        keep_original_textures: true,
        ..options()
    };
    let report = optimiser(options.clone()).pass(&scene, &scene).unwrap();
    assert_eq!(report.textures.files_reused, 1);
    assert_eq!(fs::read(&albedo).unwrap(), b"stale");

    let options = Options {
        replace_compressed_textures: true,
        ..options
    };
    let report = optimiser(options).pass(&scene, &scene).unwrap();
    assert_eq!(report.textures.planned, 2);
    assert_eq!(report.textures.files_reused, 0);
    assert!(is_ktx2_file(&albedo));

    // The compressed images were updated in place, not added again.
    let document = read_document(&scene);
    assert_eq!(document["images"].as_array().unwrap().len(), 4);
}

#[test]
fn unused_files_are_deleted_and_duplicates_keep_theirs() {
    let folder = scene_folder();
    write_gradient_png(&folder.path().join("unused.png"), 4, 4);
    let mut document = two_texture_scene();
    document["images"] = json!([{"uri": "albedo.png"}, {"uri": "normal.png"}, {"uri": "albedo.png"}, {"uri": "unused.png"}]);
    document["textures"] = json!([{"source": 0}, {"source": 1}, {"source": 2}, {"source": 3}]);
    document["materials"][0]["emissiveTexture"] = json!({"index": 2});
    let scene = folder.path().join("scene.gltf");
    write_document(&scene, &document);

    let options = Options {
        convert_textures: false,
        ..options()
    };
    let report = optimiser(options).pass(&scene, &scene).unwrap();

    assert_eq!(report.prune.total(), 4);
    assert!(!folder.path().join("unused.png").exists());
    assert!(folder.path().join("albedo.png").exists());
    let document = read_document(&scene);
    assert_eq!(document["images"], json!([{"uri": "albedo.png"}, {"uri": "normal.png"}]));
    assert_eq!(document["textures"], json!([{"source": 0}, {"source": 1}]));
    assert_eq!(document["materials"][0]["emissiveTexture"], json!({"index": 0}));
}

#[test]
fn broken_sources_fail_only_their_own_texture() {
    let folder = scene_folder();
    fs::write(folder.path().join("normal.png"), b"not a png").unwrap();
    let scene = folder.path().join("scene.gltf");

    let report = optimiser(options()).pass(&scene, &scene).unwrap();

    assert_eq!(report.textures.converted, 1);
    assert_eq!(report.textures.failed, 1);
    let document = read_document(&scene);
    assert_eq!(document["images"][1], json!({"uri": "normal.png"}));
    assert_eq!(document["textures"][1], json!({"source": 1}));
    assert_eq!(document["images"][0]["uri"], "albedo.ktx2");
}

#[test]
fn embedded_images_are_left_alone() {
    let folder = tempfile::tempdir().unwrap();
    let mut document = two_texture_scene();
    document["images"] = json!([
        {"uri": "data:image/png;base64,AAAA"},
        {"uri": "data:image/png;base64,BBBB"}
    ]);
    let scene = folder.path().join("scene.gltf");
    write_document(&scene, &document);

    let report = optimiser(options()).pass(&scene, &scene).unwrap();

    assert_eq!(report.textures.planned, 0);
    assert_eq!(read_document(&scene)["textures"], json!([{"source": 0}, {"source": 1}]));
}

#[test]
fn split_skips_channels_without_variation() {
    let folder = tempfile::tempdir().unwrap();
    let source = folder.path().join("mr.png");
    write_flat_roughness_png(&source, 8, 8);
    let options = Options {
        split_metal_rough_textures: true,
        ..options()
    };
    let job = split_job(&source);

    let outcome = converter(&options).convert(&job).unwrap();

    assert_eq!(outcome.redundant, [job.roughness_output()]);
    assert!(is_ktx2_file(&job.metallicity_output()));
    assert_eq!(ktx2_format(&job.metallicity_output()), VkFormat::R8Unorm as u32);
    assert!(!job.roughness_output().exists());
    assert!(is_ktx2_file(&job.output()));
    assert_eq!(ktx2_format(&job.output()), VkFormat::R8G8Unorm as u32);
}

#[test]
fn split_needs_two_to_four_channels() {
    let folder = tempfile::tempdir().unwrap();
    let source = folder.path().join("mr.png");
    image::GrayImage::from_fn(4, 4, |x, _| image::Luma([x as u8 * 60])).save(&source).unwrap();
    let options = Options {
        split_metal_rough_textures: true,
        ..options()
    };

    let result = converter(&options).convert(&split_job(&source));

    assert!(matches!(result, Err(ConvertError::ChannelCount { channels: 1, .. })));
}

#[test]
fn sixteen_bit_sources_are_narrowed() {
    let folder = tempfile::tempdir().unwrap();
    let source = folder.path().join("height.png");
    image::ImageBuffer::<image::Luma<u16>, _>::from_fn(5, 3, |x, y| image::Luma([(x * 1000 + y * 7) as u16]))
        .save(&source)
        .unwrap();
    let job = ConversionJob {
        policy: SlotPolicy::default(),
        ..split_job(&source)
    };
    assert_eq!(job.output(), folder.path().join("height.ktx2"));

    let outcome = converter(&options()).convert(&job).unwrap();

    assert_eq!(outcome.written, [job.output()]);
    assert_eq!(ktx2_format(&job.output()), VkFormat::R8Unorm as u32);
}
