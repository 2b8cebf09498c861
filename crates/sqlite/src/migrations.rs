use rusqlite::Connection;

use crate::Error;

struct Migration {
    version: i64,
    up: &'static str,
}

// The base schema predates the substitutesfor column and the deprecated
// table; databases produced by older releases gain them here in place.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        up: "
            CREATE TABLE package (
                name TEXT PRIMARY KEY,
                default_channel TEXT,
                add_mode TEXT
            );
            CREATE TABLE channel (
                name TEXT,
                package_name TEXT,
                head_operatorbundle_name TEXT,
                PRIMARY KEY (name, package_name),
                FOREIGN KEY (package_name) REFERENCES package(name)
            );
            CREATE TABLE channel_entry (
                entry_id INTEGER PRIMARY KEY,
                channel_name TEXT,
                package_name TEXT,
                operatorbundle_name TEXT,
                replaces INTEGER,
                depth INTEGER,
                FOREIGN KEY (replaces) REFERENCES channel_entry(entry_id) DEFERRABLE INITIALLY DEFERRED
            );
            CREATE TABLE operatorbundle (
                name TEXT PRIMARY KEY,
                csv TEXT,
                bundle TEXT,
                bundlepath TEXT,
                skiprange TEXT,
                version TEXT,
                replaces TEXT,
                skips TEXT
            );
            CREATE TABLE related_image (
                image TEXT,
                operatorbundle_name TEXT,
                FOREIGN KEY (operatorbundle_name) REFERENCES operatorbundle(name)
            );
            CREATE TABLE api (
                group_name TEXT,
                version TEXT,
                kind TEXT,
                plural TEXT,
                PRIMARY KEY (group_name, version, kind)
            );
            CREATE TABLE api_provider (
                group_name TEXT,
                version TEXT,
                kind TEXT,
                operatorbundle_name TEXT,
                operatorbundle_version TEXT,
                operatorbundle_path TEXT
            );
            CREATE TABLE api_requirer (
                group_name TEXT,
                version TEXT,
                kind TEXT,
                operatorbundle_name TEXT,
                operatorbundle_version TEXT,
                operatorbundle_path TEXT
            );
            CREATE TABLE properties (
                type TEXT,
                value TEXT,
                operatorbundle_name TEXT,
                operatorbundle_version TEXT,
                operatorbundle_path TEXT
            );
        ",
    },
    Migration {
        version: 2,
        up: "ALTER TABLE operatorbundle ADD COLUMN substitutesfor TEXT;",
    },
    Migration {
        version: 3,
        up: "
            CREATE TABLE deprecated (
                operatorbundle_name TEXT PRIMARY KEY,
                FOREIGN KEY (operatorbundle_name) REFERENCES operatorbundle(name)
            );
        ",
    },
];

/// Bring the database schema up to date, applying any missing migrations in
/// order, each inside its own transaction.
pub fn migrate(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY);",
    )?;

    for migration in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1);",
            [migration.version],
            |row| row.get(0),
        )?;
        if applied {
            continue;
        }
        tracing::debug!(version = migration.version, "applying schema migration");
        conn.execute_batch("BEGIN;")?;
        let result = conn.execute_batch(migration.up).and_then(|_| {
            conn.execute(
                "INSERT INTO schema_migrations (version) VALUES (?1);",
                [migration.version],
            )
            .map(|_| ())
        });
        match result {
            Ok(()) => conn.execute_batch("COMMIT;")?,
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK;");
                return Err(err.into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version;")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn test_migrate_upgrades_old_database() {
        let conn = Connection::open_in_memory().unwrap();
        // A database at schema version 1 lacks substitutesfor and deprecated.
        conn.execute_batch(
            "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY);
             INSERT INTO schema_migrations (version) VALUES (1);",
        )
        .unwrap();
        conn.execute_batch(MIGRATIONS[0].up).unwrap();

        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO operatorbundle (name, substitutesfor) VALUES ('b', 'a');",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO deprecated (operatorbundle_name) VALUES ('b');", [])
            .unwrap();
    }
}
