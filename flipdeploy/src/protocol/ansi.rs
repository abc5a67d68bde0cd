//! Terminal control sequence stripping.
//!
//! Momentum firmware echoes every typed character wrapped in VT100
//! insert-mode toggles, so the echo of `Ready` arrives as
//!
//! ```text
//! ESC[4h R ESC[4l ESC[4h e ESC[4l ESC[4h a ESC[4l ...
//! ```
//!
//! Colour codes (`ESC[31m`, `ESC[0m`) show up in error output as well. All of
//! them share the CSI shape `ESC '[' params letter`, which this scanner
//! removes as a single token:
//!
//! ```text
//!            ESC            '['          letter
//!   Text ----------> Escape -----> Csi ----------> Text (sequence dropped)
//!    ^                 |            | [0-9;?]
//!    |   other byte    |            +---> Csi
//!    +-----------------+            | other byte
//!    (ESC kept)                     +---> Text (sequence kept verbatim)
//! ```
//!
//! A sequence that is still open at the end of the buffer is withheld: the
//! buffer is re-normalized as more bytes arrive, so the rest of the sequence
//! will complete it.

const ESC: u8 = 0x1B;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    Escape,
    Csi,
}

fn is_parameter(byte: u8) -> bool {
    byte.is_ascii_digit() || byte == b';' || byte == b'?'
}

/// Remove every complete `ESC [ params letter` sequence from `raw`.
pub fn strip_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut state = State::Text;
    // Start of the sequence currently being scanned
    let mut seq_start = 0;
    let mut i = 0;

    while i < raw.len() {
        let byte = raw[i];
        match state {
            State::Text => {
                if byte == ESC {
                    state = State::Escape;
                    seq_start = i;
                } else {
                    out.push(byte);
                }
                i += 1;
            },
            State::Escape => {
                if byte == b'[' {
                    state = State::Csi;
                    i += 1;
                } else {
                    // Not a CSI sequence: keep the ESC, rescan this byte as text
                    out.push(ESC);
                    state = State::Text;
                }
            },
            State::Csi => {
                if is_parameter(byte) {
                    i += 1;
                } else if byte.is_ascii_alphabetic() {
                    state = State::Text;
                    i += 1;
                } else {
                    out.extend_from_slice(&raw[seq_start..i]);
                    state = State::Text;
                }
            },
        }
    }

    out
}

/// Strip control sequences and decode the rest as (lossy) UTF-8 text.
pub fn normalize(raw: &[u8]) -> String {
    String::from_utf8_lossy(&strip_escapes(raw)).into_owned()
}
