//! Fixed voice-line vocabulary shared by download probing and listings.

/// Semantic clip labels in upstream numbering order.
pub const CLIP_LABELS: [&str; 38] = [
    "任命助理",
    "交谈1",
    "交谈2",
    "交谈3",
    "晋升后交谈1",
    "晋升后交谈2",
    "信赖提升后交谈1",
    "信赖提升后交谈2",
    "信赖提升后交谈3",
    "闲置",
    "干员报到",
    "观看作战记录",
    "精英化晋升1",
    "精英化晋升2",
    "编入队伍",
    "任命队长",
    "行动出发",
    "行动开始",
    "选中干员1",
    "选中干员2",
    "部署1",
    "部署2",
    "作战中1",
    "作战中2",
    "作战中3",
    "作战中4",
    "完成高难行动",
    "3星结束行动",
    "非3星结束行动",
    "行动失败",
    "进驻设施",
    "戳一下",
    "信赖触摸",
    "标题",
    "新年祝福",
    "问候",
    "生日",
    "周年庆典",
];

/// Extension of every stored clip.
pub const CLIP_EXTENSION: &str = "wav";

const ILLEGAL_FILENAME_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Replaces characters that cannot appear in a filename with `_`.
pub fn sanitize_file_stem(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|ch| {
            if ILLEGAL_FILENAME_CHARS.contains(&ch) || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect()
}

/// Strips a trailing `.wav` from user input so `问候.wav` and `问候` name the same clip.
pub fn normalize_label(input: &str) -> String {
    let trimmed = input.trim();
    let suffix = format!(".{CLIP_EXTENSION}");
    if trimmed.to_ascii_lowercase().ends_with(&suffix) {
        // The suffix is ASCII, so the split lands on a char boundary.
        return trimmed[..trimmed.len() - suffix.len()].to_string();
    }
    trimmed.to_string()
}

/// Position in the vocabulary; labels outside it sort after every known label.
pub fn label_order(label: &str) -> usize {
    CLIP_LABELS
        .iter()
        .position(|known| *known == label)
        .unwrap_or(CLIP_LABELS.len())
}
