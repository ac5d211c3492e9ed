// Various common functions

use std::fmt;

pub fn c_string(bytes: &[u8]) -> Option<&str> {
    let bytes_without_null = match bytes.iter().position(|&b| b == 0) {
        Some(ix) => &bytes[..ix],
        None => bytes,
    };

    std::str::from_utf8(bytes_without_null).ok()
}

/// Little endian UTF-16 up to the first NUL, as the radar sends its firmware strings.
pub fn c_wide_string(bytes: &[u8]) -> String {
    let words: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|w| u16::from_le_bytes([w[0], w[1]]))
        .take_while(|w| *w != 0)
        .collect();
    String::from_utf16_lossy(&words)
}

const SAMPLES_PER_CHAR: usize = 16;

/// One character per 16 samples: the strongest of them as ' ', '.', 'o' or '*'.
pub struct PrintableSpoke<'a>(&'a [u8]);

impl<'a> PrintableSpoke<'a> {
    pub fn new<T>(data: &'a T) -> PrintableSpoke<'a>
    where
        T: ?Sized + AsRef<[u8]> + 'a,
    {
        PrintableSpoke(data.as_ref())
    }
}

impl fmt::Display for PrintableSpoke<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for chunk in self.0.chunks(SAMPLES_PER_CHAR) {
            let peak = chunk.iter().copied().max().unwrap_or(0);
            write!(
                f,
                "{}",
                match peak {
                    0..=50 => ' ',
                    51..=100 => '.',
                    101..=200 => 'o',
                    _ => '*',
                }
            )?;
        }
        write!(f, "]")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings() {
        assert_eq!(c_string(b"4G\0\0junk"), Some("4G"));
        assert_eq!(c_string(b"BR24"), Some("BR24"));
        assert_eq!(c_wide_string(&[b'1', 0, b'.', 0, b'2', 0, 0, 0, b'x', 0]), "1.2");
    }

    #[test]
    fn printable_spoke() {
        let mut spoke = [0u8; 64];
        spoke[20] = 75;
        spoke[40] = 150;
        spoke[63] = 255;
        assert_eq!(PrintableSpoke::new(&spoke).to_string(), "[ .o*]");
    }
}
