//! Best-effort correction of misspelled character names.

/// Minimum similarity for a fuzzy candidate to be accepted.
pub const MATCH_THRESHOLD: f64 = 0.6;

/// Pluggable similarity measure returning a score in `[0, 1]`.
pub type SimilarityFn = fn(&str, &str) -> f64;

// Traditional forms that show up in typed character names, folded to the
// simplified forms used by the catalog.
const VARIANT_FOLDS: &[(char, char)] = &[
    ('凱', '凯'),
    ('爾', '尔'),
    ('陳', '陈'),
    ('華', '华'),
    ('藍', '蓝'),
    ('銀', '银'),
    ('鷹', '鹰'),
    ('龍', '龙'),
    ('門', '门'),
    ('風', '风'),
    ('雲', '云'),
    ('號', '号'),
    ('麥', '麦'),
    ('蘭', '兰'),
    ('羅', '罗'),
    ('絲', '丝'),
    ('紅', '红'),
    ('黃', '黄'),
    ('鳥', '鸟'),
    ('維', '维'),
    ('達', '达'),
    ('賽', '赛'),
    ('魯', '鲁'),
    ('薩', '萨'),
    ('亞', '亚'),
    ('婭', '娅'),
    ('麗', '丽'),
    ('異', '异'),
    ('極', '极'),
    ('離', '离'),
    ('靈', '灵'),
    ('聖', '圣'),
    ('傑', '杰'),
    ('爍', '烁'),
    ('艷', '艳'),
    ('嵐', '岚'),
    ('瀾', '澜'),
    ('淺', '浅'),
    ('夢', '梦'),
    ('師', '师'),
    ('歲', '岁'),
    ('緋', '绯'),
    ('臨', '临'),
    ('戰', '战'),
    ('劍', '剑'),
    ('獵', '猎'),
    ('騎', '骑'),
    ('聲', '声'),
    ('鈴', '铃'),
    ('鐵', '铁'),
    ('銃', '铳'),
    ('語', '语'),
    ('謝', '谢'),
    ('過', '过'),
    ('來', '来'),
    ('東', '东'),
    ('蕭', '萧'),
    ('烏', '乌'),
];

fn fold_variant(ch: char) -> char {
    VARIANT_FOLDS
        .iter()
        .find(|(variant, _)| *variant == ch)
        .map(|(_, folded)| *folded)
        .unwrap_or(ch)
}

/// Lowercases, drops whitespace, and folds traditional variants.
pub fn normalize_name(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .map(fold_variant)
        .collect()
}

fn levenshtein(left: &[char], right: &[char]) -> usize {
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }
    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0usize; right.len() + 1];
    for (i, left_ch) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_ch) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(left_ch != right_ch);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right.len()]
}

/// `1 - distance / longer_length` over normalized names.
pub fn similarity(left: &str, right: &str) -> f64 {
    let left: Vec<char> = normalize_name(left).chars().collect();
    let right: Vec<char> = normalize_name(right).chars().collect();
    let longest = left.len().max(right.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&left, &right) as f64 / longest as f64
}

/// Resolves `query` against `known_names` using [`similarity`].
pub fn resolve_name<'a, I>(query: &str, known_names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    resolve_name_with(query, known_names, similarity)
}

/// Exact match first, then the best candidate scoring at least [`MATCH_THRESHOLD`].
///
/// Ties keep the earliest candidate in iteration order.
pub fn resolve_name_with<'a, I>(
    query: &str,
    known_names: I,
    similarity: SimilarityFn,
) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    let mut best: Option<(&str, f64)> = None;
    for candidate in known_names {
        if candidate == query {
            return Some(candidate.to_string());
        }
        let score = similarity(query, candidate);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best.filter(|(_, score)| *score >= MATCH_THRESHOLD)
        .map(|(candidate, _)| candidate.to_string())
}
