#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Val {
    Int(i64),
    Bytes(Vec<u8>),
    String(String),
    None,
}
