//! NATO phonetic rendering of identifiers, used for human-friendly labels.

const ALPHABET: [&str; 26] = [
    "Alfa", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India", "Juliett",
    "Kilo", "Lima", "Mike", "November", "Oscar", "Papa", "Quebec", "Romeo", "Sierra", "Tango",
    "Uniform", "Victor", "Whiskey", "Xray", "Yankee", "Zulu",
];

const NUMBERS: [&str; 10] = [
    "Zero", "One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Niner",
];

/// Number of id characters rendered into a session label.
const MNEMONIC_CHARS: usize = 4;

/// Spell `data` with phonetic code words joined by `sep`.
///
/// Characters outside `[A-Za-z0-9]` have no code word and are skipped.
pub fn phoneticize(data: &str, sep: &str) -> String {
    data.chars()
        .filter_map(|c| {
            let c = c.to_ascii_lowercase();
            match c {
                'a'..='z' => Some(ALPHABET[(c as u8 - b'a') as usize]),
                '0'..='9' => Some(NUMBERS[(c as u8 - b'0') as usize]),
                _ => None,
            }
        })
        .collect::<Vec<_>>()
        .join(sep)
}

/// Short spoken label for a session id, e.g. `"Alfa Four Bravo Niner"`.
pub fn mnemonic(id: &str) -> String {
    let head: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MNEMONIC_CHARS)
        .collect();
    phoneticize(&head, " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_digits() {
        assert_eq!(phoneticize("a4B9", "-"), "Alfa-Four-Bravo-Niner");
    }

    #[test]
    fn skips_unmapped_characters() {
        assert_eq!(phoneticize("x-1_", ""), "XrayOne");
    }

    #[test]
    fn mnemonic_uses_leading_characters() {
        assert_eq!(mnemonic("a4b9deadbeef"), "Alfa Four Bravo Niner");
        assert_eq!(mnemonic("e2"), "Echo Two");
        assert_eq!(mnemonic(""), "");
    }
}
