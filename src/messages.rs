// ABOUTME: Coded run messages attached to a migration run for the reporting layer
// ABOUTME: A message set's return code is the negated bitmask of the codes it holds

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageCode {
    InvalidFilter,
    LinkTestFailed,
    ConfigurationInvalid,
    StorageMigrationRequiredNamespace,
    StorageMigrationRequiredWarehouseOptions,
    RightDefinitionMissing,
    DistcpValidStrategy,
    ConnectionIssue,
    DbRenameOnlyWithSingleDb,
    EnvironmentConnectionIssue,
    EvaluatePartitionLocationUse,
    FlipWithoutRight,
    WarehouseDirsSameDir,
    CollectingTableDefinitions,
    DatabaseCreation,
    CollectingTables,
    NoDatabases,
    MissingDataPoint,
    FatalTableFailure,
    TableExecutionFailed,
    LocationCollision,
    GlmBuild,
    MiscError,
    // warnings
    DumpEnvFlip,
    DistcpRdlWithoutWarehouseDir,
    EnvironmentDisconnected,
    StorageMigrationNamespaceLeft,
    StorageMigrationNamespaceLeftMissingRdlGlm,
    TableLocationRemapped,
    LocationNotMatchWarehouse,
    WarehouseDirectoriesNotDefined,
    WarehouseDirectoriesRetrievedFromHiveEnv,
    TablesExcluded,
    DistcpWithTableFilters,
    DistcpWithoutTableFilters,
}

impl MessageCode {
    pub fn code(&self) -> u32 {
        match self {
            MessageCode::InvalidFilter => 1,
            MessageCode::LinkTestFailed => 5,
            MessageCode::ConfigurationInvalid => 17,
            MessageCode::StorageMigrationRequiredNamespace => 18,
            MessageCode::StorageMigrationRequiredWarehouseOptions => 20,
            MessageCode::RightDefinitionMissing => 21,
            MessageCode::DistcpValidStrategy => 23,
            MessageCode::ConnectionIssue => 28,
            MessageCode::DbRenameOnlyWithSingleDb => 48,
            MessageCode::EnvironmentConnectionIssue => 49,
            MessageCode::DumpEnvFlip => 52,
            MessageCode::DistcpRdlWithoutWarehouseDir => 55,
            MessageCode::EnvironmentDisconnected => 58,
            MessageCode::StorageMigrationNamespaceLeft => 60,
            MessageCode::StorageMigrationNamespaceLeftMissingRdlGlm => 61,
            MessageCode::TableLocationRemapped => 62,
            MessageCode::EvaluatePartitionLocationUse => 67,
            MessageCode::DistcpWithTableFilters => 72,
            MessageCode::DistcpWithoutTableFilters => 73,
            MessageCode::LocationNotMatchWarehouse => 75,
            MessageCode::FlipWithoutRight => 80,
            MessageCode::WarehouseDirsSameDir => 81,
            MessageCode::CollectingTableDefinitions => 82,
            MessageCode::DatabaseCreation => 83,
            MessageCode::CollectingTables => 84,
            MessageCode::NoDatabases => 100,
            MessageCode::MissingDataPoint => 101,
            MessageCode::FatalTableFailure => 102,
            MessageCode::TableExecutionFailed => 103,
            MessageCode::LocationCollision => 104,
            MessageCode::GlmBuild => 105,
            MessageCode::MiscError => 106,
            MessageCode::WarehouseDirectoriesNotDefined => 110,
            MessageCode::WarehouseDirectoriesRetrievedFromHiveEnv => 111,
            MessageCode::TablesExcluded => 112,
        }
    }

    /// Description template; `{0}`, `{1}`... are replaced positionally.
    pub fn template(&self) -> &'static str {
        match self {
            MessageCode::InvalidFilter => "The filter expression `{0}` is not a valid regular expression: {1}",
            MessageCode::LinkTestFailed => "Link test failed between the LEFT and RIGHT namespaces: {0}",
            MessageCode::ConfigurationInvalid => "A configuration element is not valid: {0}",
            MessageCode::StorageMigrationRequiredNamespace => {
                "STORAGE_MIGRATION requires a target namespace or common storage to define the new namespace."
            }
            MessageCode::StorageMigrationRequiredWarehouseOptions => {
                "STORAGE_MIGRATION with ALIGNED translation requires 'managed' and 'external' warehouse \
                 directories, either globally or as warehouse plans."
            }
            MessageCode::RightDefinitionMissing => {
                "The RIGHT cluster definition is missing. Only STORAGE_MIGRATION or DUMP strategies allow it to be skipped."
            }
            MessageCode::DistcpValidStrategy => "`distcp` is not valid for the {0} strategy.",
            MessageCode::ConnectionIssue => "Connection issue. Check the environment definitions and gateways.",
            MessageCode::DbRenameOnlyWithSingleDb => "Database rename can only be used with a single database.",
            MessageCode::EnvironmentConnectionIssue => "There is an issue connecting to the {0} environment: {1}",
            MessageCode::EvaluatePartitionLocationUse => {
                "Evaluating partition locations is only valid for SCHEMA_ONLY, DUMP and STORAGE_MIGRATION."
            }
            MessageCode::FlipWithoutRight => "'flip' needs a RIGHT cluster definition.",
            MessageCode::WarehouseDirsSameDir => {
                "You can't use the same location for EXTERNAL {0} and MANAGED {1} warehouse locations."
            }
            MessageCode::CollectingTableDefinitions => "There was an issue collecting table definitions: {0}",
            MessageCode::DatabaseCreation => "There was an issue creating/modifying databases: {0}",
            MessageCode::CollectingTables => "There was an issue collecting tables: {0}",
            MessageCode::NoDatabases => "No databases specified OR found with the database filter.",
            MessageCode::MissingDataPoint => "{0}",
            MessageCode::FatalTableFailure => "Table {0} failed fatally: {1}",
            MessageCode::TableExecutionFailed => "{0} table(s) failed while applying statements.",
            MessageCode::LocationCollision => "{0} target location(s) are claimed by more than one table.",
            MessageCode::GlmBuild => "Building the global location map failed: {0}",
            MessageCode::MiscError => "{0}",
            MessageCode::DumpEnvFlip => {
                "DUMP was requested on the RIGHT cluster. The RIGHT configuration was moved to the LEFT."
            }
            MessageCode::DistcpRdlWithoutWarehouseDir => {
                "ALIGNED translation with `distcp` needs warehouse directories to build the distcp plans."
            }
            MessageCode::EnvironmentDisconnected => {
                "Environment {0} is disconnected. Current db/table status could not be determined."
            }
            MessageCode::StorageMigrationNamespaceLeft => {
                "No target namespace for STORAGE_MIGRATION. Assuming migration within namespace {0}."
            }
            MessageCode::StorageMigrationNamespaceLeftMissingRdlGlm => {
                "STORAGE_MIGRATION in the same namespace without ALIGNED translation needs location map entries."
            }
            MessageCode::TableLocationRemapped => {
                "The table location matched a global location map entry and will be set explicitly."
            }
            MessageCode::LocationNotMatchWarehouse => {
                "After translation the `{0}` location is NOT aligned with the database warehouse. `{1}`->`{2}`. \
                 Consider adding a location map entry to align them."
            }
            MessageCode::WarehouseDirectoriesNotDefined => "Warehouse directories are not defined for database {0}.",
            MessageCode::WarehouseDirectoriesRetrievedFromHiveEnv => {
                "Warehouse directories for database {0} were retrieved from the RIGHT environment defaults."
            }
            MessageCode::TablesExcluded => "{0} table(s) were excluded from the run after errors.",
            MessageCode::DistcpWithTableFilters => {
                "`distcp` plans are built per table because table filters are in use."
            }
            MessageCode::DistcpWithoutTableFilters => {
                "`distcp` plans include the database base directory, which may hold more than the tables."
            }
        }
    }

    pub fn render(&self, args: &[String]) -> String {
        let mut out = self.template().to_string();
        for (idx, arg) in args.iter().enumerate() {
            out = out.replace(&format!("{{{}}}", idx), arg);
        }
        out
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Serialized name doubles as the display name.
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}", name)
    }
}

/// A set of codes, each with the arguments from its latest occurrence.
#[derive(Debug, Clone, Default)]
pub struct Messages {
    entries: BTreeMap<MessageCode, Vec<String>>,
}

impl Messages {
    pub fn set(&mut self, code: MessageCode, args: Vec<String>) {
        self.entries.insert(code, args);
    }

    pub fn contains(&self, code: MessageCode) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn codes(&self) -> impl Iterator<Item = MessageCode> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MessageCode, &[String])> + '_ {
        self.entries.iter().map(|(code, args)| (*code, args.as_slice()))
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(code, args)| format!("{}-->{}", code, code.render(args)))
            .collect()
    }

    pub fn return_code(&self) -> i128 {
        let mask = self
            .entries
            .keys()
            .fold(0u128, |acc, code| acc | (1u128 << code.code()));
        -(mask as i128)
    }
}
