use crate::error::Error;

/// Characters the destination naming convention does not allow in a column
/// identifier.
const ILLEGAL_CHARS: [char; 3] = ['.', ':', '/'];

/// Formats a fetched column name for the destination schema: every illegal
/// character becomes a space. Idempotent.
pub fn sql_column_name(name: &str) -> String {
    name.chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { ' ' } else { c })
        .collect()
}

/// Confirms every fetched column exists in the destination table's schema.
/// Comparison is case-insensitive. The first unknown column aborts with a
/// schema mismatch naming it and the full known-column list.
pub fn check_columns_compatible(columns: &[String], known_columns: &[String]) -> Result<(), Error> {
    let known_upper: Vec<String> = known_columns.iter().map(|c| c.to_uppercase()).collect();

    for column in columns {
        if !known_upper.contains(&column.to_uppercase()) {
            return Err(Error::SchemaMismatch {
                column: column.clone(),
                known_columns: known_columns.to_vec(),
            });
        }
    }

    Ok(())
}
