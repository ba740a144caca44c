/// Keeps only ASCII digits.
pub fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lookup candidates for a Brazilian number: with and without the country
/// code, with and without the mobile 9th digit. The input comes first.
pub fn variants(raw: &str) -> Vec<String> {
    let d = digits(raw);
    if d.is_empty() {
        return Vec::new();
    }
    let national = d.strip_prefix("55").filter(|n| n.len() >= 10).unwrap_or(&d);

    let mut nationals = vec![national.to_owned()];
    match national.len() {
        // DDD + 9 + 8 digits
        11 if national.as_bytes()[2] == b'9' => {
            nationals.push(format!("{}{}", &national[..2], &national[3..]))
        }
        // DDD + 8 digits
        10 => nationals.push(format!("{}9{}", &national[..2], &national[2..])),
        _ => {}
    }

    let mut out = vec![d.clone()];
    for n in nationals {
        for candidate in [format!("55{n}"), n] {
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
    out
}
