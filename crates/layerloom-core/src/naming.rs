//! Deterministic per-layer frame naming.

/// Zero-pad `index` to at least `width` digits. Longer numbers are kept intact.
pub fn pad_index(index: u32, width: usize) -> String {
    format!("{:0width$}", index, width = width)
}

/// `<base>/<layer>/<index padded>.png`
pub fn frame_location(base: &str, layer: &str, index: u32, width: usize) -> String {
    format!(
        "{}/{}/{}.png",
        base.trim_end_matches('/'),
        layer,
        pad_index(index, width)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_index() {
        assert_eq!(pad_index(1, 4), "0001");
        assert_eq!(pad_index(180, 4), "0180");
        assert_eq!(pad_index(12345, 4), "12345");
        assert_eq!(pad_index(7, 0), "7");
    }

    #[test]
    fn test_frame_location() {
        assert_eq!(frame_location("/anim0", "light", 1, 4), "/anim0/light/0001.png");
        assert_eq!(
            frame_location("https://cdn.example/anim0/", "mapper2", 42, 4),
            "https://cdn.example/anim0/mapper2/0042.png"
        );
    }
}
