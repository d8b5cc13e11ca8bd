use std::path::Path;

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// `"ALDERMAN - WARD 3"` -> `"alderman-ward3"`
pub fn normalize_contest_name(name: &str) -> String {
    name.to_lowercase().replace(" - ", "-").replace(' ', "")
}

/// `"Utah Senate District 11"` -> `"utah_senate_district_11"`
pub fn slug(name: &str) -> String {
    let mut res = String::new();
    for c in name.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            res.push(c);
        } else if !res.ends_with('_') {
            res.push('_');
        }
    }
    res.trim_matches('_').to_string()
}

pub fn candidate_id_of(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// `"ANN LEE"` -> `"Ann Lee"`
pub fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Reads the boolean flags of the exports: `true`/`false`, `1`/`0`.
pub fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" | "" => Some(false),
        _ => None,
    }
}
