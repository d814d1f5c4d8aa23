use std::path::{Path, PathBuf};
use std::process::Command;

fn bin() -> String {
    std::env::var("CARGO_BIN_EXE_layerloom").unwrap_or_else(|_| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../target/debug/layerloom")
            .to_string_lossy()
            .to_string()
    })
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("layerloom_cli_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_frames(dir: &Path, layer: &str, count: u32, rgba: [u8; 4]) {
    let layer_dir = dir.join(layer);
    std::fs::create_dir_all(&layer_dir).unwrap();
    for index in 1..=count {
        image::RgbaImage::from_pixel(4, 4, image::Rgba(rgba))
            .save(layer_dir.join(format!("{:04}.png", index)))
            .unwrap();
    }
}

fn write_config(dir: &Path, terminal_index: u32) -> PathBuf {
    let config = format!(
        r#"
[canvas]
width = 4
height = 4

[animation]
base_path = "{base}"
layers = ["light", "dark"]
terminal_index = {terminal_index}

[export]
output_dir = "{base}/out"
"#,
        base = dir.display(),
        terminal_index = terminal_index
    );
    let path = dir.join("layerloom.toml");
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn info_prints_default_configuration_as_json() {
    let dir = scratch_dir("info");
    let output = Command::new(bin())
        .args(["info", "--json"])
        .current_dir(&dir)
        .output()
        .expect("failed to spawn layerloom");
    assert!(output.status.success(), "info failed: {:?}", output);

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["animation"]["terminal_index"], 181);
    assert_eq!(value["encoder"]["dither"], "FloydSteinberg-serpentine");
    assert_eq!(value["export"]["filename"], "avali.gif");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn export_writes_gif_and_json_summary() {
    let dir = scratch_dir("export");
    write_frames(&dir, "light", 3, [255, 0, 0, 255]);
    write_frames(&dir, "dark", 3, [0, 0, 0, 0]);
    let config = write_config(&dir, 4);

    let output = Command::new(bin())
        .args(["export", "--backend", "software", "--json", "--config"])
        .arg(&config)
        .output()
        .expect("failed to spawn layerloom");
    assert!(
        output.status.success(),
        "export failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["frames"], 3);
    assert_eq!(summary["held_loads"], 0);
    assert_eq!(summary["artifact"]["frame_count"], 3);

    let gif = std::fs::read(dir.join("out").join("avali.gif")).unwrap();
    assert_eq!(&gif[..6], b"GIF89a");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn compose_writes_png_from_explicit_layers() {
    let dir = scratch_dir("compose");
    write_frames(&dir, "light", 1, [0, 255, 255, 255]);
    let config = write_config(&dir, 2);
    let out = dir.join("composite.png");

    let output = Command::new(bin())
        .arg("compose")
        .arg("--config")
        .arg(&config)
        .arg("--layer")
        .arg(format!("1={}", dir.join("light").join("0001.png").display()))
        .arg("--output")
        .arg(&out)
        .output()
        .expect("failed to spawn layerloom");
    assert!(
        output.status.success(),
        "compose failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let composite = image::open(&out).unwrap().to_rgba8();
    assert_eq!(composite.get_pixel(2, 2).0, [0, 255, 255, 255]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn export_rejects_empty_and_overflowing_frame_counts() {
    let dir = scratch_dir("frames");
    let config = write_config(&dir, 4);

    for frames in ["0", "4294967295"] {
        let output = Command::new(bin())
            .args(["export", "--backend", "software", "--frames", frames, "--config"])
            .arg(&config)
            .output()
            .expect("failed to spawn layerloom");
        assert!(!output.status.success(), "--frames {} should fail", frames);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(!stderr.contains("panicked"), "--frames {}: {}", frames, stderr);
        assert!(!stderr.contains("no frames to encode"), "--frames {}: {}", frames, stderr);
    }
    assert!(!dir.join("out").join("avali.gif").exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_config_file_fails() {
    let output = Command::new(bin())
        .args(["info", "--config", "/nonexistent/layerloom.toml"])
        .output()
        .expect("failed to spawn layerloom");
    assert!(!output.status.success());
}
