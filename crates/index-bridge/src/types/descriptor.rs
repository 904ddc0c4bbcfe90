use crate::config::IndexOptions;

/// Identifies the index family mirroring one primary table.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    /// Keyspace of the primary table.
    pub keyspace: String,
    /// Primary table name.
    pub table: String,
    /// Options fixed at registration.
    pub options: IndexOptions,
}

impl IndexDescriptor {
    /// Creates a descriptor for `<keyspace>.<table>`.
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>, options: IndexOptions) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            options,
        }
    }

    /// The index name, `<keyspace>.<table>` lower-cased.
    ///
    /// For a rollover family this is also the write alias.
    pub fn name(&self) -> String {
        format!("{}.{}", self.keyspace, self.table).to_lowercase()
    }

    /// Whether the index is an auto-rolling family.
    pub fn is_rollover(&self) -> bool {
        self.options.rollover
    }

    /// Name of the first generation index of a rollover family.
    pub fn first_generation(&self) -> String {
        format!("{}-000001", self.name())
    }

    /// Pattern matching every generation of the family.
    pub fn generation_pattern(&self) -> String {
        format!("{}-*", self.name())
    }

    /// Id of the rollover lifecycle policy.
    pub fn policy_id(&self) -> String {
        self.name()
    }

    /// Name of the index template binding the rollover alias.
    pub fn template_name(&self) -> String {
        self.name()
    }
}
