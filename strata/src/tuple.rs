use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::STRING_LEN;

/// The kind of a tuple field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Int,
    String,
}

impl FieldKind {
    /// On-disk width of a single value of this kind.
    pub fn size(self) -> usize {
        match self {
            FieldKind::Int => 8,
            FieldKind::String => STRING_LEN,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Int => write!(f, "int"),
            FieldKind::String => write!(f, "string"),
        }
    }
}

/// A named field of a tuple. The qualifier carries the table (or alias) the
/// field came from and may be empty; it only participates in name resolution
/// as a tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub qualifier: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            qualifier: String::new(),
            kind,
        }
    }

    pub fn qualified(name: impl Into<String>, qualifier: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            qualifier: qualifier.into(),
            kind,
        }
    }

    fn display_name(&self) -> String {
        if self.qualifier.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.qualifier, self.name)
        }
    }
}

/// The schema of a tuple: an ordered list of fields.
#[derive(Debug, Clone, Default)]
pub struct TupleDesc {
    pub fields: Vec<FieldDef>,
}

impl TupleDesc {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fixed on-disk width of one tuple with this schema.
    pub fn bytes_per_tuple(&self) -> usize {
        self.fields.iter().map(|f| f.kind.size()).sum()
    }

    /// Concatenate `other`'s fields after this descriptor's fields.
    pub fn merge(&self, other: &TupleDesc) -> TupleDesc {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        TupleDesc { fields }
    }

    /// Overwrite the table qualifier of every field.
    pub fn set_table_alias(&mut self, alias: &str) {
        for f in &mut self.fields {
            f.qualifier = alias.to_string();
        }
    }

    /// Resolve `field` to an index in this descriptor. Name and kind must
    /// match; an unqualified request matching several entries is ambiguous,
    /// a qualified request prefers the entry with the same qualifier.
    pub fn find_index(&self, field: &FieldDef) -> Result<usize> {
        let mut best: Option<usize> = None;
        for (i, f) in self.fields.iter().enumerate() {
            if f.name == field.name && f.kind == field.kind {
                if field.qualifier.is_empty() && best.is_some() {
                    return Err(Error::Ambiguous(field.name.clone()));
                }
                if f.qualifier == field.qualifier || best.is_none() {
                    best = Some(i);
                }
            }
        }
        best.ok_or_else(|| Error::NotFound(format!("field {}", field.display_name())))
    }

    /// Projection of a single field, as used by column pages.
    pub fn single(&self, index: usize) -> Result<TupleDesc> {
        let field = self
            .fields
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("field index {index}")))?;
        Ok(TupleDesc {
            fields: vec![field.clone()],
        })
    }
}

/// Descriptor equality is length plus per-field name and kind; the qualifier
/// is deliberately ignored.
impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.name == b.name && a.kind == b.kind)
    }
}

impl Eq for TupleDesc {}

/// Comparison operators usable between two field values of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Int(i64),
    String(String),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::String(_) => FieldKind::String,
        }
    }

    /// Order two values of the same kind; comparing across kinds is an error.
    pub fn compare(&self, other: &FieldValue) -> Result<Ordering> {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => Ok(a.cmp(b)),
            (FieldValue::String(a), FieldValue::String(b)) => Ok(a.cmp(b)),
            _ => Err(Error::TypeMismatch(format!(
                "cannot compare {} with {}",
                self.kind(),
                other.kind()
            ))),
        }
    }

    /// Evaluate `self op other`.
    pub fn eval_cmp(&self, op: CmpOp, other: &FieldValue) -> Result<bool> {
        let ord = self.compare(other)?;
        Ok(match op {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::NotEq => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::LtEq => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::GtEq => ord != Ordering::Less,
        })
    }

    fn write_to(&self, buf: &mut impl BufMut) {
        match self {
            FieldValue::Int(v) => buf.put_i64_le(*v),
            FieldValue::String(s) => {
                let bytes = s.as_bytes();
                let n = bytes.len().min(STRING_LEN);
                buf.put_slice(&bytes[..n]);
                buf.put_bytes(0, STRING_LEN - n);
            }
        }
    }

    fn read_from(buf: &mut impl Buf, kind: FieldKind) -> Result<FieldValue> {
        if buf.remaining() < kind.size() {
            return Err(Error::Malformed(
                "buffer too short for field value".to_string(),
            ));
        }
        match kind {
            FieldKind::Int => Ok(FieldValue::Int(buf.get_i64_le())),
            FieldKind::String => {
                let mut raw = vec![0u8; STRING_LEN];
                buf.copy_to_slice(&mut raw);
                let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                Ok(FieldValue::String(
                    String::from_utf8_lossy(&raw[..end]).into_owned(),
                ))
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::String(s) => write!(f, "{s}"),
        }
    }
}

/// The physical location of a tuple. Each file layout emits and consumes its
/// own variant; operators round-trip the value unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordId {
    /// A slot on a row page.
    Row { page_no: usize, slot: usize },
    /// A slot shared by a strip of peer column pages; `base_page` is the
    /// logical page number of the tuple's first column.
    Column { base_page: usize, slot: usize },
}

/// A tuple: a schema, one value per field, and (once stored or scanned) the
/// record id of its physical location.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub desc: TupleDesc,
    pub values: Vec<FieldValue>,
    pub rid: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: TupleDesc, values: Vec<FieldValue>) -> Self {
        Self {
            desc,
            values,
            rid: None,
        }
    }

    /// Serialize the values in field order into `buf`, fixed width.
    pub fn write_to(&self, buf: &mut impl BufMut) -> Result<()> {
        if self.values.len() != self.desc.len() {
            return Err(Error::Malformed(format!(
                "tuple has {} values for {} fields",
                self.values.len(),
                self.desc.len()
            )));
        }
        for value in &self.values {
            value.write_to(buf);
        }
        Ok(())
    }

    /// Deserialize one tuple with the given schema from `buf`.
    pub fn read_from(buf: &mut impl Buf, desc: &TupleDesc) -> Result<Tuple> {
        let mut values = Vec::with_capacity(desc.len());
        for field in &desc.fields {
            values.push(FieldValue::read_from(buf, field.kind)?);
        }
        Ok(Tuple::new(desc.clone(), values))
    }

    /// A content-addressed key for the tuple, used for DISTINCT and GROUP BY.
    pub fn key_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.desc.bytes_per_tuple());
        for value in &self.values {
            value.write_to(&mut buf);
        }
        buf
    }

    /// Project out the named fields into a new tuple. Matching does not
    /// require the qualifier, but prefers an exact qualifier match.
    pub fn project(&self, fields: &[FieldDef]) -> Result<Tuple> {
        let mut out_fields = Vec::with_capacity(fields.len());
        let mut out_values = Vec::with_capacity(fields.len());
        for field in fields {
            let exact = self
                .desc
                .fields
                .iter()
                .position(|f| f.name == field.name && f.qualifier == field.qualifier);
            let index = match exact {
                Some(i) => i,
                None => self
                    .desc
                    .fields
                    .iter()
                    .position(|f| f.name == field.name)
                    .ok_or_else(|| Error::NotFound(format!("field {}", field.display_name())))?,
            };
            out_fields.push(self.desc.fields[index].clone());
            out_values.push(self.values[index].clone());
        }
        Ok(Tuple::new(TupleDesc::new(out_fields), out_values))
    }

    /// Concatenate `other` onto `self`, merging the descriptors. The joined
    /// tuple keeps `self`'s record id.
    pub fn join(&self, other: &Tuple) -> Tuple {
        let mut values = self.values.clone();
        values.extend(other.values.iter().cloned());
        Tuple {
            desc: self.desc.merge(&other.desc),
            values,
            rid: self.rid,
        }
    }
}

/// Tuple equality is descriptor equality plus pairwise value equality; the
/// record id is ignored.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.values == other.values
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_desc() -> TupleDesc {
        TupleDesc::new(vec![
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("age", FieldKind::Int),
        ])
    }

    fn josie() -> Tuple {
        Tuple::new(
            people_desc(),
            vec![
                FieldValue::String("josie".to_string()),
                FieldValue::Int(20),
            ],
        )
    }

    #[test]
    fn desc_equality_ignores_qualifier() {
        let a = people_desc();
        let mut b = people_desc();
        b.set_table_alias("t1");
        assert_eq!(a, b);

        let c = TupleDesc::new(vec![FieldDef::new("name", FieldKind::String)]);
        assert_ne!(a, c);
    }

    #[test]
    fn merge_concatenates_fields() {
        let merged = people_desc().merge(&people_desc());
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.fields[2].name, "name");
        assert_eq!(merged.bytes_per_tuple(), 2 * (STRING_LEN + 8));
    }

    #[test]
    fn find_index_resolves_by_qualifier() {
        let mut left = people_desc();
        left.set_table_alias("l");
        let mut right = people_desc();
        right.set_table_alias("r");
        let joined = left.merge(&right);

        let idx = joined
            .find_index(&FieldDef::qualified("age", "r", FieldKind::Int))
            .unwrap();
        assert_eq!(idx, 3);

        let err = joined
            .find_index(&FieldDef::new("age", FieldKind::Int))
            .unwrap_err();
        assert!(matches!(err, Error::Ambiguous(_)));

        let err = joined
            .find_index(&FieldDef::new("salary", FieldKind::Int))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn serialization_round_trips_and_pads_strings() {
        let t = josie();
        let mut buf = Vec::new();
        t.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), STRING_LEN + 8);
        // "josie" then zero padding.
        assert_eq!(&buf[..5], b"josie");
        assert!(buf[5..STRING_LEN].iter().all(|&b| b == 0));

        let mut slice = &buf[..];
        let back = Tuple::read_from(&mut slice, &people_desc()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn long_strings_are_truncated_on_write() {
        let desc = TupleDesc::new(vec![FieldDef::new("s", FieldKind::String)]);
        let long = "x".repeat(STRING_LEN + 10);
        let t = Tuple::new(desc.clone(), vec![FieldValue::String(long)]);
        let mut buf = Vec::new();
        t.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), STRING_LEN);

        let mut slice = &buf[..];
        let back = Tuple::read_from(&mut slice, &desc).unwrap();
        assert_eq!(
            back.values[0],
            FieldValue::String("x".repeat(STRING_LEN))
        );
    }

    #[test]
    fn cross_kind_comparison_is_a_type_mismatch() {
        let a = FieldValue::Int(1);
        let b = FieldValue::String("1".to_string());
        assert!(matches!(
            a.eval_cmp(CmpOp::Eq, &b),
            Err(Error::TypeMismatch(_))
        ));
        assert!(a.eval_cmp(CmpOp::Lt, &FieldValue::Int(2)).unwrap());
        assert!(FieldValue::String("a".to_string())
            .eval_cmp(CmpOp::Lt, &FieldValue::String("b".to_string()))
            .unwrap());
    }

    #[test]
    fn project_prefers_qualifier_match() {
        let mut left = people_desc();
        left.set_table_alias("l");
        let mut right = people_desc();
        right.set_table_alias("r");

        let joined = Tuple::new(
            left.merge(&right),
            vec![
                FieldValue::String("josie".to_string()),
                FieldValue::Int(20),
                FieldValue::String("annie".to_string()),
                FieldValue::Int(17),
            ],
        );

        let p = joined
            .project(&[FieldDef::qualified("name", "r", FieldKind::String)])
            .unwrap();
        assert_eq!(p.values, vec![FieldValue::String("annie".to_string())]);

        // Without a qualifier the first match wins.
        let p = joined
            .project(&[FieldDef::new("name", FieldKind::String)])
            .unwrap();
        assert_eq!(p.values, vec![FieldValue::String("josie".to_string())]);
    }

    #[test]
    fn join_merges_values_and_descs() {
        let j = josie().join(&josie());
        assert_eq!(j.values.len(), 4);
        assert_eq!(j.desc, people_desc().merge(&people_desc()));
    }

    #[test]
    fn tuple_equality_ignores_rid() {
        let a = josie();
        let mut b = josie();
        b.rid = Some(RecordId::Row { page_no: 3, slot: 7 });
        assert_eq!(a, b);
    }
}
