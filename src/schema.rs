//! Schema registry for FieldSync
//!
//! Static list of entity definitions used to create local cache tables and
//! drive bulk ingestion. Registry order is parent-before-child; the
//! connection manager creates tables in exactly this order.

/// One locally cached entity: table name, column DDL, and the foreign-key
/// columns that get a covering index.
///
/// Foreign keys are index-only. SQLite's `foreign_keys` pragma stays OFF
/// during table creation and bulk load, so the registry never emits
/// cascading constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    pub name: &'static str,
    pub column_ddl: &'static str,
    pub foreign_keys: &'static [&'static str],
}

impl Entity {
    /// `CREATE TABLE IF NOT EXISTS` statement for this entity
    pub fn create_table_sql(&self) -> String {
        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.name, self.column_ddl)
    }

    /// Column names declared in the DDL, in declaration order
    pub fn column_names(&self) -> Vec<&'static str> {
        self.column_ddl
            .split(',')
            .filter_map(|col| col.trim().split_whitespace().next())
            .collect()
    }

    /// One `CREATE INDEX IF NOT EXISTS` statement per foreign-key column
    pub fn index_sql(&self) -> Vec<String> {
        self.foreign_keys
            .iter()
            .map(|fk| {
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                    self.name, fk, self.name, fk
                )
            })
            .collect()
    }
}

/// Reference and job data cached locally for offline inspection work.
pub const REGISTRY: &[Entity] = &[
    Entity {
        name: "inspection_jobs",
        column_ddl: "job_number TEXT PRIMARY KEY, \
                     site_name TEXT, \
                     address TEXT, \
                     scheduled_date TEXT, \
                     status TEXT, \
                     context_id INTEGER",
        foreign_keys: &[],
    },
    Entity {
        name: "job_units",
        column_ddl: "id INTEGER PRIMARY KEY, \
                     job_number TEXT NOT NULL, \
                     unit_measure_ref TEXT NOT NULL, \
                     description TEXT, \
                     location TEXT",
        foreign_keys: &["job_number"],
    },
    Entity {
        name: "survey_question_sets",
        column_ddl: "id INTEGER PRIMARY KEY, \
                     name TEXT NOT NULL, \
                     survey_type INTEGER NOT NULL, \
                     version INTEGER",
        foreign_keys: &[],
    },
    Entity {
        name: "survey_questions",
        column_ddl: "id INTEGER PRIMARY KEY, \
                     question_set_id INTEGER NOT NULL, \
                     question_number TEXT NOT NULL, \
                     text TEXT NOT NULL, \
                     nc_severity TEXT",
        foreign_keys: &["question_set_id"],
    },
    Entity {
        name: "question_options",
        column_ddl: "id INTEGER PRIMARY KEY, \
                     question_id INTEGER NOT NULL, \
                     label TEXT NOT NULL, \
                     value TEXT",
        foreign_keys: &["question_id"],
    },
    Entity {
        name: "site_contacts",
        column_ddl: "id INTEGER PRIMARY KEY, \
                     job_number TEXT NOT NULL, \
                     name TEXT, \
                     phone TEXT, \
                     email TEXT",
        foreign_keys: &["job_number"],
    },
    Entity {
        name: "job_documents",
        column_ddl: "id INTEGER PRIMARY KEY, \
                     job_number TEXT NOT NULL, \
                     title TEXT, \
                     url TEXT",
        foreign_keys: &["job_number"],
    },
    Entity {
        name: "completed_surveys",
        column_ddl: "id INTEGER PRIMARY KEY, \
                     job_number TEXT NOT NULL, \
                     unit_measure_ref TEXT NOT NULL, \
                     question_set_id INTEGER NOT NULL, \
                     survey_type INTEGER NOT NULL, \
                     submitted_at TEXT",
        foreign_keys: &["job_number", "question_set_id"],
    },
];

/// Look up an entity by table name
pub fn find(name: &str) -> Option<&'static Entity> {
    REGISTRY.iter().find(|e| e.name == name)
}
