use std::collections::HashSet;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Makes a header usable as a unique column key. Names are kept verbatim;
/// blanks get a positional name and repeats get a numeric suffix.
pub fn unique_header_name(name: &str, position: usize, existing_names: &mut HashSet<String>) -> String {
    let trimmed = name.trim();
    let base = if trimmed.is_empty() {
        format!("column_{}", position + 1)
    } else {
        trimmed.to_string()
    };

    // If the name already exists, add a numeric suffix
    let mut candidate = base.clone();
    let mut counter = 1;
    while !existing_names.insert(candidate.clone()) {
        candidate = format!("{}_{}", base, counter);
        counter += 1;
    }

    candidate
}

pub fn unique_headers<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut existing_names = HashSet::new();
    names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| unique_header_name(name, idx, &mut existing_names))
        .collect()
}

/// XLSX files are ZIP containers; everything else is treated as delimited text.
pub fn looks_like_xlsx(data: &[u8]) -> bool {
    data.starts_with(ZIP_MAGIC)
}
