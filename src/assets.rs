use rust_embed::RustEmbed;

/// SQL migrations compiled into the binary
#[derive(RustEmbed)]
#[folder = "migrations/"]
pub struct MigrationAssets;

impl MigrationAssets {
    /// `(file name, SQL)` pairs in apply order. File names start with a
    /// zero-padded version, so name order is version order.
    pub fn get_migrations() -> Vec<(String, String)> {
        let mut migrations: Vec<(String, String)> = Self::iter()
            .filter(|name| name.ends_with(".sql"))
            .filter_map(|name| {
                let file = Self::get(&name)?;
                let sql = String::from_utf8_lossy(&file.data).into_owned();
                Some((name.into_owned(), sql))
            })
            .collect();
        migrations.sort_by(|a, b| a.0.cmp(&b.0));
        migrations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_embedded_in_order() {
        let migrations = MigrationAssets::get_migrations();
        assert!(!migrations.is_empty());
        assert!(migrations.windows(2).all(|pair| pair[0].0 < pair[1].0));

        let (name, sql) = &migrations[0];
        assert!(name.starts_with("001_"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS requests"));
    }
}
