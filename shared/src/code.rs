//! Room code conversions.
//!
//! Four-letter (V1) codes are the ASCII bytes read as a little-endian i32,
//! so they are always positive. Six-letter (V2) codes pack two letter
//! groups into the low 30 bits and always set the sign bit.

use rand::Rng;

const V2_ALPHABET: &[u8; 26] = b"QWXRTYLPESDFGHUJKZOCVBINMA";
const V2_MAP: [u32; 26] = [
    25, 21, 19, 10, 8, 11, 12, 13, 22, 15, 16, 6, 24, 23, 18, 7, 0, 3, 9, 4, 14, 20, 1, 2, 5, 17,
];

/// Code used by local/offline rooms.
pub const LOCAL_GAME: i32 = 32;

fn letter_index(letter: u8) -> Option<u32> {
    letter
        .to_ascii_uppercase()
        .checked_sub(b'A')
        .and_then(|idx| V2_MAP.get(usize::from(idx)).copied())
}

/// Converts a 4 or 6 letter code to its integer form.
pub fn code_to_int(code: &str) -> Option<i32> {
    let bytes = code.as_bytes();
    match bytes.len() {
        4 if bytes.iter().all(u8::is_ascii_alphabetic) => {
            let upper: Vec<u8> = bytes.iter().map(u8::to_ascii_uppercase).collect();
            Some(i32::from_le_bytes([upper[0], upper[1], upper[2], upper[3]]))
        }
        6 => {
            let mut idx = [0u32; 6];
            for (slot, &letter) in idx.iter_mut().zip(bytes) {
                *slot = letter_index(letter)?;
            }
            let [a, b, c, d, e, f] = idx;
            let one = (a + 26 * b) & 0x3FF;
            let two = c + 26 * (d + 26 * (e + 26 * f));
            Some((one | ((two << 10) & 0x3FFF_FC00) | 0x8000_0000) as i32)
        }
        _ => None,
    }
}

/// Converts an integer code back to letters. Returns `None` for values that
/// are not a valid V1 code (non-letter bytes); every negative value is a V2
/// code.
pub fn int_to_code(value: i32) -> Option<String> {
    if value >= 0 {
        let bytes = value.to_le_bytes();
        if !bytes.iter().all(u8::is_ascii_uppercase) {
            return None;
        }
        return String::from_utf8(bytes.to_vec()).ok();
    }

    let raw = value as u32;
    let a = (raw & 0x3FF) as usize;
    let b = ((raw >> 10) & 0xF_FFFF) as usize;
    let letters = [
        V2_ALPHABET[a % 26],
        V2_ALPHABET[(a / 26) % 26],
        V2_ALPHABET[b % 26],
        V2_ALPHABET[(b / 26) % 26],
        V2_ALPHABET[(b / 676) % 26],
        V2_ALPHABET[(b / 17576) % 26],
    ];
    String::from_utf8(letters.to_vec()).ok()
}

/// Picks a random six-letter code.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    let letters: String = (0..6)
        .map(|_| char::from(V2_ALPHABET[rng.gen_range(0..26)]))
        .collect();
    // Every letter of the alphabet is mappable.
    code_to_int(&letters).unwrap_or(LOCAL_GAME)
}

/// Formats a code for logs, falling back to the raw number.
pub fn display_code(value: i32) -> String {
    int_to_code(value).unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_v1_known_value() {
        assert_eq!(code_to_int("HOLA"), Some(1095520072));
        assert_eq!(int_to_code(1095520072).as_deref(), Some("HOLA"));
    }

    #[test]
    fn test_v2_known_value() {
        assert_eq!(int_to_code(-2050590356).as_deref(), Some("QUEASY"));
        assert_eq!(code_to_int("QUEASY"), Some(-2050590356));
    }

    #[test]
    fn test_lowercase_accepted() {
        assert_eq!(code_to_int("queasy"), code_to_int("QUEASY"));
        assert_eq!(code_to_int("hola"), code_to_int("HOLA"));
    }

    #[test]
    fn test_invalid_lengths() {
        assert_eq!(code_to_int(""), None);
        assert_eq!(code_to_int("ABCDE"), None);
        assert_eq!(code_to_int("AB1D"), None);
        assert_eq!(code_to_int("ABC1EF"), None);
    }

    #[test]
    fn test_round_trip_random_codes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let six: String = (0..6)
                .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
                .collect();
            let value = code_to_int(&six).unwrap();
            assert!(value < 0);
            assert_eq!(int_to_code(value).unwrap(), six);

            let four: String = (0..4)
                .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
                .collect();
            let value = code_to_int(&four).unwrap();
            assert!(value > 0);
            assert_eq!(int_to_code(value).unwrap(), four);
        }
    }

    #[test]
    fn test_generated_codes_are_v2() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let code = generate_code(&mut rng);
            assert!(code < 0);
            assert_eq!(int_to_code(code).map(|c| c.len()), Some(6));
        }
    }

    #[test]
    fn test_display_code_fallback() {
        assert_eq!(display_code(LOCAL_GAME), "32");
    }
}
