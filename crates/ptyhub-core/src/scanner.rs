//! Byte-level scanning for the two control sequences the engine acts on.
//!
//! The engine does not emulate a terminal. It only looks for a window-title
//! sequence (to keep a session title) and for clear-screen sequences (to drop
//! scrollback the terminal has been told to discard). Both scans are pure and
//! never fail: malformed or truncated sequences are ignored.

/// Standard OSC introducer (`ESC ]`).
pub const OSC_OPENER: &[u8] = b"\x1b]";

/// Title lead-in emitted by some legacy producers (`! ]`).
pub const LEGACY_TITLE_OPENER: &[u8] = b"\x21]";

/// Separator between the title class digit and the title text.
const TITLE_SEPARATOR: u8 = b';';

/// BEL, terminating the title text.
const TITLE_TERMINATOR: u8 = 0x07;

/// Clear-screen and scrollback-reset sequences.
pub const CLEAR_SEQUENCES: [&[u8]; 3] = [
    b"\x1b[H\x1b[2J", // cursor home + clear screen
    b"\x1b[2J",       // clear screen
    b"\x1b[3J",       // clear scrollback
];

/// Extracts window titles from raw output chunks.
///
/// The set of accepted openers is configurable because producers disagree on
/// the lead-in; by default both the OSC introducer and the legacy `!]` form
/// are recognised.
#[derive(Debug, Clone)]
pub struct TitleScanner {
    openers: Vec<Vec<u8>>,
}

impl Default for TitleScanner {
    fn default() -> Self {
        Self::new(vec![OSC_OPENER.to_vec(), LEGACY_TITLE_OPENER.to_vec()])
    }
}

impl TitleScanner {
    /// Build a scanner from a list of opener byte sequences. Empty openers
    /// are discarded.
    pub fn new(openers: Vec<Vec<u8>>) -> Self {
        Self {
            openers: openers.into_iter().filter(|o| !o.is_empty()).collect(),
        }
    }

    pub fn openers(&self) -> &[Vec<u8>] {
        &self.openers
    }

    /// Scan a chunk for the most recent title sequence.
    ///
    /// Only the last opener in the chunk is considered. It must be followed
    /// by a class digit `0`..=`2` and `;`, and the text runs up to the first
    /// BEL after the separator. Anything else yields `None`, leaving the
    /// current title untouched.
    pub fn scan(&self, chunk: &[u8]) -> Option<String> {
        let (start, opener_len) = self
            .openers
            .iter()
            .filter_map(|opener| rfind(chunk, opener).map(|idx| (idx, opener.len())))
            // Latest start wins; on a tie prefer the longer opener.
            .max_by_key(|&(idx, len)| (idx, len))?;

        let class_pos = start + opener_len;
        let class = *chunk.get(class_pos)?;
        let separator = *chunk.get(class_pos + 1)?;
        if !(b'0'..=b'2').contains(&class) || separator != TITLE_SEPARATOR {
            return None;
        }

        let text_start = class_pos + 2;
        let text_len = chunk[text_start..]
            .iter()
            .position(|&b| b == TITLE_TERMINATOR)?;

        Some(String::from_utf8_lossy(&chunk[text_start..text_start + text_len]).into_owned())
    }
}

/// Offset of the latest clear-screen sequence in `chunk`, if any.
///
/// Each known sequence is located at its rightmost occurrence and the one
/// starting furthest into the chunk wins. A bare `ESC[2J` inside
/// `ESC[H ESC[2J` therefore wins over the composite, and the cursor-home
/// prefix is dropped with the rest of the old output.
pub fn last_clear_offset(chunk: &[u8]) -> Option<usize> {
    CLEAR_SEQUENCES
        .iter()
        .filter_map(|seq| rfind(chunk, seq))
        .max()
}

/// Last occurrence of `needle` in `haystack`.
fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
