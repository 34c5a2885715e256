use strata::{Error, FieldDef, FieldValue, Result, Tuple};

/// An expression an operator can evaluate against a tuple: a field
/// reference, resolved by name (and qualifier, when given) against the
/// tuple's descriptor, or a constant.
#[derive(Debug, Clone)]
pub enum Expr {
    Field(FieldDef),
    Const(FieldValue),
}

impl Expr {
    pub fn field(def: FieldDef) -> Self {
        Expr::Field(def)
    }

    pub fn int(v: i64) -> Self {
        Expr::Const(FieldValue::Int(v))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::Const(FieldValue::String(s.into()))
    }

    /// The value of this expression on `tuple`.
    pub fn eval(&self, tuple: &Tuple) -> Result<FieldValue> {
        match self {
            Expr::Field(def) => {
                let index = tuple.desc.find_index(def)?;
                tuple.values.get(index).cloned().ok_or_else(|| {
                    Error::Malformed(format!("tuple has no value for field index {index}"))
                })
            }
            Expr::Const(value) => Ok(value.clone()),
        }
    }

    /// The field this expression produces, used to build output descriptors.
    pub fn out_field(&self) -> FieldDef {
        match self {
            Expr::Field(def) => def.clone(),
            Expr::Const(value) => FieldDef::new("const", value.kind()),
        }
    }
}
