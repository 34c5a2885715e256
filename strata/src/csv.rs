use std::io::BufRead;
use std::sync::Arc;

use crate::buffer_pool::TransactionId;
use crate::error::{Error, Result};
use crate::file::DbFile;
use crate::tuple::{FieldKind, FieldValue, Tuple};
use crate::STRING_LEN;

/// How a CSV source should be interpreted.
pub struct CsvOptions {
    pub has_header: bool,
    pub separator: char,
    /// Some datasets carry a trailing separator on each line; this drops
    /// the resulting empty final field.
    pub skip_last_field: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            has_header: false,
            separator: ',',
            skip_last_field: false,
        }
    }
}

/// Load CSV rows into a file, one committed transaction per row. Integer
/// fields are parsed through floating point and truncated, so `"42.0"`
/// loads as 42; string fields are cut down to `STRING_LEN` bytes. Any
/// malformed line fails the whole load.
pub fn load_csv(
    file: &Arc<dyn DbFile>,
    reader: impl BufRead,
    opts: &CsvOptions,
) -> Result<usize> {
    let desc = file.descriptor().clone();
    let pool = Arc::clone(file.buffer_pool());
    let mut loaded = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;

        let mut fields: Vec<&str> = line.split(opts.separator).collect();
        if opts.skip_last_field {
            fields.pop();
        }
        if fields.len() != desc.len() {
            return Err(Error::Malformed(format!(
                "line {line_no} ({line}) has {} fields, expected {}",
                fields.len(),
                desc.len()
            )));
        }
        if line_no == 1 && opts.has_header {
            continue;
        }

        let mut values = Vec::with_capacity(desc.len());
        for (field, def) in fields.iter().zip(&desc.fields) {
            match def.kind {
                FieldKind::Int => {
                    let parsed: f64 = field.trim().parse().map_err(|_| {
                        Error::TypeMismatch(format!(
                            "couldn't convert {field:?} to int on line {line_no}"
                        ))
                    })?;
                    values.push(FieldValue::Int(parsed as i64));
                }
                FieldKind::String => {
                    let mut s = field.to_string();
                    if s.len() > STRING_LEN {
                        let mut end = STRING_LEN;
                        while !s.is_char_boundary(end) {
                            end -= 1;
                        }
                        s.truncate(end);
                    }
                    values.push(FieldValue::String(s));
                }
            }
        }

        let tuple = Tuple::new(desc.clone(), values);
        let tid = TransactionId::fresh();
        pool.begin(tid)?;
        match Arc::clone(file).insert_tuple(&tuple, tid) {
            Ok(_) => pool.commit(tid)?,
            Err(e) => {
                pool.abort(tid);
                return Err(e);
            }
        }
        loaded += 1;
    }

    crate::strata_debug_log!("[load_csv] loaded {loaded} rows");
    Ok(loaded)
}
