// ABOUTME: Named metastore queries per backend type
// ABOUTME: Parameters are positional `?` placeholders, filled by the metastore gateway

use crate::config::MetastoreBackend;

pub const PART_LOCATIONS: &str = "part_locations";
pub const DATABASE_TABLE_LOCATIONS: &str = "database_table_locations";
pub const DATABASE_PARTITION_LOCATIONS: &str = "database_partition_locations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefinition {
    pub name: &'static str,
    pub statement: &'static str,
}

/// Rows:
/// - `part_locations(db, table)`: `[part_name, location]`
/// - `database_table_locations(db)`: `[table, tbl_type, location]`
/// - `database_partition_locations(db)`: `[table, tbl_type, table_location, part_name, part_location]`
#[derive(Debug, Clone)]
pub struct QueryDefinitions {
    backend: MetastoreBackend,
    queries: Vec<QueryDefinition>,
}

const MYSQL: [QueryDefinition; 3] = [
    QueryDefinition {
        name: PART_LOCATIONS,
        statement: "SELECT P.PART_NAME, S.LOCATION \
            FROM DBS D \
            INNER JOIN TBLS T ON D.DB_ID = T.DB_ID \
            INNER JOIN PARTITIONS P ON T.TBL_ID = P.TBL_ID \
            INNER JOIN SDS S ON P.SD_ID = S.SD_ID \
            WHERE D.NAME = ? AND T.TBL_NAME = ? \
            ORDER BY P.PART_NAME",
    },
    QueryDefinition {
        name: DATABASE_TABLE_LOCATIONS,
        statement: "SELECT T.TBL_NAME, T.TBL_TYPE, S.LOCATION \
            FROM DBS D \
            INNER JOIN TBLS T ON D.DB_ID = T.DB_ID \
            LEFT OUTER JOIN SDS S ON T.SD_ID = S.SD_ID \
            WHERE D.NAME = ? AND T.TBL_TYPE != 'VIRTUAL_VIEW' \
            ORDER BY T.TBL_NAME",
    },
    QueryDefinition {
        name: DATABASE_PARTITION_LOCATIONS,
        statement: "SELECT T.TBL_NAME, T.TBL_TYPE, TS.LOCATION, P.PART_NAME, PS.LOCATION \
            FROM DBS D \
            INNER JOIN TBLS T ON D.DB_ID = T.DB_ID \
            INNER JOIN SDS TS ON T.SD_ID = TS.SD_ID \
            INNER JOIN PARTITIONS P ON T.TBL_ID = P.TBL_ID \
            INNER JOIN SDS PS ON P.SD_ID = PS.SD_ID \
            WHERE D.NAME = ? \
            ORDER BY T.TBL_NAME, P.PART_NAME",
    },
];

const POSTGRES: [QueryDefinition; 3] = [
    QueryDefinition {
        name: PART_LOCATIONS,
        statement: "SELECT P.\"PART_NAME\", S.\"LOCATION\" \
            FROM \"DBS\" D \
            INNER JOIN \"TBLS\" T ON D.\"DB_ID\" = T.\"DB_ID\" \
            INNER JOIN \"PARTITIONS\" P ON T.\"TBL_ID\" = P.\"TBL_ID\" \
            INNER JOIN \"SDS\" S ON P.\"SD_ID\" = S.\"SD_ID\" \
            WHERE D.\"NAME\" = ? AND T.\"TBL_NAME\" = ? \
            ORDER BY P.\"PART_NAME\"",
    },
    QueryDefinition {
        name: DATABASE_TABLE_LOCATIONS,
        statement: "SELECT T.\"TBL_NAME\", T.\"TBL_TYPE\", S.\"LOCATION\" \
            FROM \"DBS\" D \
            INNER JOIN \"TBLS\" T ON D.\"DB_ID\" = T.\"DB_ID\" \
            LEFT OUTER JOIN \"SDS\" S ON T.\"SD_ID\" = S.\"SD_ID\" \
            WHERE D.\"NAME\" = ? AND T.\"TBL_TYPE\" != 'VIRTUAL_VIEW' \
            ORDER BY T.\"TBL_NAME\"",
    },
    QueryDefinition {
        name: DATABASE_PARTITION_LOCATIONS,
        statement: "SELECT T.\"TBL_NAME\", T.\"TBL_TYPE\", TS.\"LOCATION\", P.\"PART_NAME\", PS.\"LOCATION\" \
            FROM \"DBS\" D \
            INNER JOIN \"TBLS\" T ON D.\"DB_ID\" = T.\"DB_ID\" \
            INNER JOIN \"SDS\" TS ON T.\"SD_ID\" = TS.\"SD_ID\" \
            INNER JOIN \"PARTITIONS\" P ON T.\"TBL_ID\" = P.\"TBL_ID\" \
            INNER JOIN \"SDS\" PS ON P.\"SD_ID\" = PS.\"SD_ID\" \
            WHERE D.\"NAME\" = ? \
            ORDER BY T.\"TBL_NAME\", P.\"PART_NAME\"",
    },
];

// Oracle keeps the MySQL text; only the LOCATION column type differs and the driver handles it.
const ORACLE: [QueryDefinition; 3] = MYSQL;

impl QueryDefinitions {
    pub fn for_backend(backend: MetastoreBackend) -> Self {
        let queries = match backend {
            MetastoreBackend::Mysql => MYSQL.to_vec(),
            MetastoreBackend::Postgres => POSTGRES.to_vec(),
            MetastoreBackend::Oracle => ORACLE.to_vec(),
        };
        Self { backend, queries }
    }

    pub fn backend(&self) -> MetastoreBackend {
        self.backend
    }

    pub fn get(&self, name: &str) -> Option<&QueryDefinition> {
        self.queries.iter().find(|q| q.name == name)
    }
}
