pub(crate) const CR: u8 = 13;
pub(crate) const LF: u8 = 10;
pub(crate) const SP: u8 = 32;
pub(crate) const COLON: u8 = 58;
pub(crate) const ZERO: u8 = 48;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

pub(crate) fn atoi(data: &[u8]) -> Option<u32> {
    if data.is_empty() {
        return None;
    }

    let mut val: u32 = 0;
    for digit in data {
        if !digit.is_ascii_digit() {
            return None;
        }
        val = val.checked_mul(10)?.checked_add((digit - ZERO) as u32)?;
    }

    Some(val)
}

/// Right aligned decimal (or hex) rendering of an integer without allocation.
pub(crate) struct AsciiInt {
    buf: [u8; 20],
    start: usize,
}

impl AsciiInt {
    pub(crate) fn hex(value: u64) -> Self {
        Self::render(value, 16)
    }

    fn render(value: u64, radix: u64) -> Self {
        let mut buf = [SP; 20];
        let mut start = buf.len();
        let mut int = value;
        loop {
            start -= 1;
            buf[start] = HEX_DIGITS[(int % radix) as usize];
            int /= radix;
            if int == 0 {
                break;
            }
        }

        AsciiInt { buf, start }
    }

    pub(crate) fn as_str(&self) -> &str {
        // only ever holds ascii digits
        str::from_utf8(&self.buf[self.start..]).unwrap_or("")
    }
}

impl From<u64> for AsciiInt {
    fn from(value: u64) -> Self {
        Self::render(value, 10)
    }
}

fn hex_val(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Decode an `application/x-www-form-urlencoded` value into `dst`. `+` becomes a space and
/// `%XX` escapes are resolved, an invalid escape is copied through literally.  Returns false
/// when `dst` filled up before the whole value was decoded.
pub(crate) fn url_decode_into<const N: usize>(src: &str, dst: &mut heapless::Vec<u8, N>) -> bool {
    let src = src.as_bytes();
    let mut i = 0;
    while i < src.len() {
        let byte = match src[i] {
            b'+' => b' ',
            b'%' if i + 2 < src.len() => {
                match (hex_val(src[i + 1]), hex_val(src[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        i += 2;
                        hi << 4 | lo
                    }
                    _ => b'%',
                }
            }
            b => b,
        };
        if dst.push(byte).is_err() {
            return false;
        }
        i += 1;
    }

    true
}

/// Longest prefix of `bytes` that is valid utf8.
pub(crate) fn utf8_prefix(bytes: &[u8]) -> &str {
    match str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
    }
}

/// Append as much of `src` as fits into `dst` without splitting a character.  Returns false
/// if anything was cut off.
pub(crate) fn push_truncated<const N: usize>(dst: &mut heapless::String<N>, src: &str) -> bool {
    let room = N - dst.len();
    if src.len() <= room {
        let _ = dst.push_str(src);
        return true;
    }

    let mut end = room;
    while !src.is_char_boundary(end) {
        end -= 1;
    }
    let _ = dst.push_str(&src[..end]);

    false
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_atoi() {
        assert!(atoi("0".as_bytes()) == Some(0));
        assert!(atoi("5".as_bytes()) == Some(5));
        assert!(atoi("123".as_bytes()) == Some(123));
        assert!(atoi("123456789".as_bytes()) == Some(123456789));
        assert!(atoi("0123456789".as_bytes()) == Some(123456789));
        assert!(atoi("abc".as_bytes()) == None);
        assert!(atoi("123a456".as_bytes()) == None);
        assert!(atoi("".as_bytes()) == None);
        assert!(atoi("99999999999".as_bytes()) == None);
    }

    #[test]
    fn test_itoa() {
        let a: AsciiInt = 1u64.into();
        assert!("1" == a.as_str(), "got: {:?}", a.as_str());
        let a: AsciiInt = 1203u64.into();
        assert!("1203" == a.as_str(), "got: {:?}", a.as_str());
        let a: AsciiInt = 100002u64.into();
        assert!("100002" == a.as_str(), "got: {:?}", a.as_str());
        let a: AsciiInt = u64::MAX.into();
        assert!("18446744073709551615" == a.as_str(), "got: {:?}", a.as_str());
    }

    #[test]
    fn test_hex() {
        assert_eq!(AsciiInt::hex(0).as_str(), "0");
        assert_eq!(AsciiInt::hex(21).as_str(), "15");
        assert_eq!(AsciiInt::hex(4096).as_str(), "1000");
    }

    #[test]
    fn test_url_decode() {
        let mut out = heapless::Vec::<u8, 32>::new();
        assert!(url_decode_into("a+b%3Cc%3e%2", &mut out));
        assert_eq!(&out[..], b"a b<c>%2");

        let mut out = heapless::Vec::<u8, 4>::new();
        assert!(!url_decode_into("abcdef", &mut out));
        assert_eq!(&out[..], b"abcd");

        let mut out = heapless::Vec::<u8, 8>::new();
        assert!(url_decode_into("%zz%", &mut out));
        assert_eq!(&out[..], b"%zz%");
    }

    #[test]
    fn test_push_truncated() {
        let mut s = heapless::String::<4>::new();
        assert!(push_truncated(&mut s, "ab"));
        assert!(!push_truncated(&mut s, "cé"));
        // 'é' is two bytes and does not fit after "abc"
        assert_eq!(s.as_str(), "abc");
    }

    #[test]
    fn test_utf8_prefix() {
        assert_eq!(utf8_prefix(b"ok"), "ok");
        assert_eq!(utf8_prefix(&[b'a', 0xC3]), "a");
    }
}
