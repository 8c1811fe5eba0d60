#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertResult {
    pub inserted_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}
