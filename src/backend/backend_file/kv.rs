use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};

use log::error;

use super::FindError;

pub type KeyValues = HashMap<String, String>;

/// Reads `key: value` lines, failing if any of `required` is absent.
pub fn read(input: impl Read, required: &[&str]) -> Result<KeyValues, FindError> {
    let mut kv = HashMap::new();

    for line in BufReader::new(input).lines() {
        let line = line.map_err(|e| {
            error!("couldn't read line: {e}");
            FindError::Internal
        })?;

        let parts = line.split_once(':').ok_or_else(|| {
            error!("invalid line, can't split");
            FindError::Internal
        })?;

        let (k, v) = parts;
        let Some(v) = v.strip_prefix(' ') else {
            error!("invalid line - no whitespace after colon");
            return Err(FindError::Internal);
        };
        kv.insert(k.into(), v.into());
    }

    if let Some(missing) = required.iter().find(|k| !kv.contains_key(**k)) {
        error!("missing key \"{missing}\"");
        return Err(FindError::Internal);
    }

    Ok(kv)
}

pub fn write(mut output: impl Write, keyvalues: &KeyValues) -> io::Result<()> {
    for (k, v) in keyvalues {
        if k.contains(':') || k.contains('\n') || v.contains('\n') {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("can't store \"{k}\" as a single line"),
            ));
        }
        writeln!(output, "{}: {}", k, v)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_back_what_was_written() {
        let mut kv = KeyValues::new();
        kv.insert("username".into(), "John Doe".into());
        kv.insert("email".into(), "john@example.com".into());
        kv.insert("note".into(), "colons: fine".into());

        let mut buf = vec![];
        write(&mut buf, &kv).unwrap();

        let back = read(&buf[..], &["username", "email"]).unwrap();
        assert_eq!(back, kv);
    }

    #[test]
    fn missing_required_key() {
        let input = "username: John Doe\n";

        assert!(matches!(
            read(input.as_bytes(), &["username", "email"]),
            Err(FindError::Internal)
        ));
    }

    #[test]
    fn malformed_lines() {
        assert!(read("username John".as_bytes(), &[]).is_err());
        assert!(read("username:John".as_bytes(), &[]).is_err());
    }

    #[test]
    fn multiline_values_are_refused() {
        let mut kv = KeyValues::new();
        kv.insert("username".into(), "John\nemail: evil@example.com".into());

        let err = write(vec![], &kv).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
