//! Index naming convention.
//!
//! An index name is the `_`-joined list of the fields it covers, in order.
//! A `\` escapes a literal `_` or `\` inside a field name:
//!
//! ```text
//! byDate        -> ["byDate"]
//! author_date   -> ["author", "date"]
//! user\_id      -> ["user_id"]
//! ```

use crate::error::IndexNameError;

const SEPARATOR: char = '_';
const ESCAPE: char = '\\';

/// Decode an index name into its ordered field list.
pub fn name_to_fields(name: &str) -> Result<Vec<String>, IndexNameError> {
    let fail = |reason| IndexNameError {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(fail("empty name"));
    }

    let mut fields = Vec::new();
    let mut field = String::new();
    let mut escaped = false;

    for c in name.chars() {
        if escaped {
            if c != SEPARATOR && c != ESCAPE {
                return Err(fail("escape must precede `_` or `\\`"));
            }
            field.push(c);
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == SEPARATOR {
            if field.is_empty() {
                return Err(fail("empty field"));
            }
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(c);
        }
    }

    if escaped {
        return Err(fail("dangling escape"));
    }
    if field.is_empty() {
        return Err(fail("empty field"));
    }
    fields.push(field);

    Ok(fields)
}

/// Encode an ordered field list as an index name. Inverse of [`name_to_fields`].
pub fn fields_to_name<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| {
            let mut out = String::with_capacity(f.as_ref().len());
            for c in f.as_ref().chars() {
                if c == SEPARATOR || c == ESCAPE {
                    out.push(ESCAPE);
                }
                out.push(c);
            }
            out
        })
        .collect::<Vec<_>>()
        .join("_")
}
