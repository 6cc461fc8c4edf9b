// ABOUTME: Drives one migration run through its fixed sequence of stages
// ABOUTME: Owns the conversion tree and fans table units out to bounded worker pools

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::context::{UnitContext, UnitResult};
use super::discovery::{self, TableFilter};
use super::{database, reports, table};
use crate::config::{Config, DataStrategyKind};
use crate::error::MirrorError;
use crate::gateway::Gateways;
use crate::location::{
    DistcpPlan, DistcpPlanBuilder, GlmBuilder, GlobalLocationMap, TranslationRecorder, Translator, Warehouse,
    WarehousePlans, WarehouseResolver, WarehouseSource,
};
use crate::messages::MessageCode;
use crate::model::{
    Conversion, DBMirror, Environment, RunStatus, RunStatusReport, Stage, StageStatus, TableMirror, TableType,
};
use crate::strategy::{self, DataStrategy};

type UnitOutput = (TableMirror, UnitResult);

/// What a finished run hands back.
#[derive(Debug)]
pub struct RunOutcome {
    pub success: bool,
    pub return_code: i128,
    pub report: RunStatusReport,
    pub conversion: Conversion,
    pub distcp_plans: Vec<DistcpPlan>,
}

pub struct Coordinator {
    config: Arc<Config>,
    gateways: Gateways,
    status: Arc<RunStatus>,
    strategy: Arc<dyn DataStrategy>,
    conversion: Conversion,
    preloaded: bool,
    env_vars: BTreeMap<Environment, BTreeMap<String, String>>,
    connected: BTreeSet<Environment>,
    filter: Option<Arc<TableFilter>>,
    plans: Option<WarehousePlans>,
    builder: GlmBuilder,
    warehouses: BTreeMap<String, Warehouse>,
    glm: GlobalLocationMap,
    recorder: Arc<TranslationRecorder>,
    translator: Option<Arc<Translator>>,
    builds: JoinSet<UnitOutput>,
    distcp_plans: Vec<DistcpPlan>,
    excluded: usize,
    tallied: bool,
}

fn panicked(err: tokio::task::JoinError) -> anyhow::Error {
    anyhow!("Table unit panicked: {}", err)
}

impl Coordinator {
    /// Normalizes the configuration once; it is read-only from here on.
    pub fn new(mut config: Config, gateways: Gateways) -> Self {
        let status = Arc::new(RunStatus::new());
        for (code, args) in config.normalize().iter() {
            status.add_warning(code, args.to_vec());
        }

        let mut glm = GlobalLocationMap::default();
        for entry in &config.global_location_map {
            if let Some(target) = &entry.external {
                glm.add_user(&entry.source, TableType::External, target);
            }
            if let Some(target) = &entry.managed {
                glm.add_user(&entry.source, TableType::Managed, target);
            }
        }

        let env_vars = config
            .clusters
            .iter()
            .map(|(env, cluster)| (*env, cluster.hive_vars.clone()))
            .collect();
        let builder = GlmBuilder::new(
            config.consolidation_level,
            config.partition_level_mismatch,
            config.transfer.transfer_prefix.clone(),
            config.transfer.storage_migration_postfix.clone(),
        );

        Self {
            strategy: strategy::select(&config),
            config: Arc::new(config),
            gateways,
            status,
            conversion: Conversion::default(),
            preloaded: false,
            env_vars,
            connected: BTreeSet::new(),
            filter: None,
            plans: None,
            builder,
            warehouses: BTreeMap::new(),
            glm,
            recorder: Arc::new(TranslationRecorder::default()),
            translator: None,
            builds: JoinSet::new(),
            distcp_plans: Vec::new(),
            excluded: 0,
            tallied: false,
        }
    }

    /// Runs against an already-discovered tree instead of live environments.
    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = conversion;
        self.conversion.relink();
        self.preloaded = true;
        self
    }

    /// Adds or replaces a database's warehouse plan ahead of the location map build.
    pub fn add_warehouse_plan(&mut self, database: &str, external: &str, managed: &str) -> Result<Warehouse> {
        let plans = self.plans()?;
        Ok(plans.add(database, external, managed)?.clone())
    }

    pub fn remove_warehouse_plan(&mut self, database: &str) -> Result<Option<Warehouse>> {
        Ok(self.plans()?.remove(database))
    }

    fn plans(&mut self) -> Result<&mut WarehousePlans> {
        let plans = match self.plans.take() {
            Some(plans) => plans,
            None => WarehousePlans::from_config(&self.config)?,
        };
        Ok(self.plans.insert(plans))
    }

    pub fn status(&self) -> Arc<RunStatus> {
        self.status.clone()
    }

    /// Runs the pipeline on its own task.
    pub fn spawn(self) -> JoinHandle<RunOutcome> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> RunOutcome {
        info!(strategy = %self.config.data_strategy, preloaded = self.preloaded, "Starting migration run");
        let mut failed = false;
        for stage in Stage::ALL {
            if failed && stage != Stage::SaveReports {
                continue;
            }
            if let Some(reason) = self.skip_reason(stage) {
                debug!(stage = ?stage, reason, "Skipping stage");
                if let Err(e) = self.status.set_stage(stage, StageStatus::Skipped) {
                    warn!(stage = ?stage, error = %e, "Could not mark stage skipped");
                }
                continue;
            }
            if let Err(e) = self.run_stage(stage).await {
                let message = format!("{:#}", e);
                error!(stage = ?stage, error = %message, "Stage failed");
                if !self.status.has_errors() {
                    self.status.add_error(MessageCode::MiscError, vec![message]);
                }
                failed = true;
                // Build units outlive the stage that spawned them.
                if let Some(e) = self.join_builds().await {
                    debug!(error = %format!("{:#}", e), "Pending build failed after the run stopped");
                }
            }
        }
        self.finish()
    }

    fn skip_reason(&self, stage: Stage) -> Option<&'static str> {
        let config = &self.config;
        match stage {
            s if self.preloaded && s.needs_connection() => Some("pre-loaded conversion"),
            Stage::ValidateConnections if !config.link_test => Some("link test not requested"),
            Stage::CollectTables
            | Stage::LoadTableMetadata
            | Stage::BuildTableDdl
            | Stage::ValidateEnvironmentSets
            | Stage::ExecuteTableDdl
                if config.database_only =>
            {
                Some("database-only run")
            }
            Stage::ExecuteDatabaseDdl | Stage::ExecuteTableDdl
                if config.data_strategy == DataStrategyKind::Dump =>
            {
                Some("DUMP only renders statements")
            }
            Stage::ExecuteDatabaseDdl | Stage::ExecuteTableDdl if !config.execute || self.preloaded => {
                Some("dry run")
            }
            Stage::SaveReports if config.output_dir.is_none() => Some("no output directory"),
            _ => None,
        }
    }

    async fn run_stage(&mut self, stage: Stage) -> Result<()> {
        self.status.set_stage(stage, StageStatus::InProgress)?;
        let result = match self.config.stage_timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), self.dispatch(stage)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::Error::new(MirrorError::Stage(format!(
                    "{:?} did not finish within {}s",
                    stage, secs
                )))),
            },
            None => self.dispatch(stage).await,
        };
        let status = if result.is_ok() {
            StageStatus::Completed
        } else {
            StageStatus::Errored
        };
        self.status.set_stage(stage, status)?;
        if result.is_ok() {
            info!(stage = ?stage, "Stage completed");
        }
        result
    }

    async fn dispatch(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::ValidateConfig => self.validate_config(),
            Stage::ValidateConnections => self.validate_connections().await,
            Stage::Connect => self.connect().await,
            Stage::GatherDatabases => self.gather_databases().await,
            Stage::LoadEnvironmentVars => self.load_environment_vars().await,
            Stage::CollectDatabases => self.collect_databases().await,
            Stage::CollectTables => self.collect_tables().await,
            Stage::BuildGlm => self.build_glm().await,
            Stage::BuildDatabaseDdl => self.build_database_ddl(),
            Stage::LoadTableMetadata => self.load_table_metadata().await,
            Stage::BuildTableDdl => self.build_table_ddl().await,
            Stage::ValidateEnvironmentSets => self.validate_environment_sets(),
            Stage::ExecuteDatabaseDdl => self.execute_database_ddl().await,
            Stage::ExecuteTableDdl => self.execute_table_ddl().await,
            Stage::SaveReports => self.save_reports().await,
        }
    }

    fn validate_config(&mut self) -> Result<()> {
        let report = self.config.validate();
        for (code, args) in report.warnings.iter() {
            self.status.add_warning(code, args.to_vec());
        }
        for (code, args) in report.errors.iter() {
            self.status.add_error(code, args.to_vec());
        }
        if !report.is_valid() {
            return Err(anyhow::Error::new(MirrorError::Configuration(
                report.errors.messages().join("; "),
            )));
        }

        self.plans()?;
        self.filter = Some(Arc::new(TableFilter::from_config(&self.config)?));

        if !self.preloaded {
            if let Some(path) = &self.config.load_test_data {
                info!(path = %path.display(), "Loading test data in place of live discovery");
                self.conversion = Conversion::load(path)?;
                self.preloaded = true;
            }
        }
        Ok(())
    }

    async fn validate_connections(&mut self) -> Result<()> {
        let probe = self
            .gateways
            .probe
            .clone()
            .ok_or_else(|| anyhow::Error::new(MirrorError::Connection("no storage probe for the link test".to_string())))?;
        let mut namespaces: Vec<String> = [Environment::Left, Environment::Right]
            .into_iter()
            .filter_map(|env| self.config.namespace(env).map(str::to_string))
            .collect();
        namespaces.extend(self.config.target_namespace());
        namespaces.sort();
        namespaces.dedup();

        if let Err(e) = probe.link_test(&namespaces).await {
            self.status.add_error(MessageCode::LinkTestFailed, vec![format!("{:#}", e)]);
            return Err(e.context("Link test failed"));
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let sql = self.gateways.sql()?.clone();
        let config = self.config.clone();
        for (environment, cluster) in &config.clusters {
            if cluster.disconnected {
                warn!(environment = %environment, "Environment marked disconnected; not connecting");
                self.status
                    .add_warning(MessageCode::EnvironmentDisconnected, vec![environment.to_string()]);
                continue;
            }
            match sql.session(*environment).await {
                Ok(_) => {
                    debug!(environment = %environment, "Connected");
                    self.connected.insert(*environment);
                }
                Err(e) => {
                    self.status.add_error(
                        MessageCode::EnvironmentConnectionIssue,
                        vec![environment.to_string(), format!("{:#}", e)],
                    );
                    return Err(e.context(format!("Failed to connect to {}", environment)));
                }
            }
        }
        Ok(())
    }

    async fn gather_databases(&mut self) -> Result<()> {
        let sql = self.gateways.sql()?.clone();
        let databases = discovery::gather_databases(&self.config, sql.as_ref()).await?;
        if databases.is_empty() {
            self.status.add_error(MessageCode::NoDatabases, vec![]);
            return Err(anyhow::Error::new(MirrorError::Configuration(
                "no databases to migrate".to_string(),
            )));
        }
        for name in &databases {
            self.conversion.add_database(name);
        }
        info!(databases = databases.len(), "Databases gathered");
        Ok(())
    }

    async fn load_environment_vars(&mut self) -> Result<()> {
        let sql = self.gateways.sql()?.clone();
        for environment in self.connected.clone() {
            let mut vars = discovery::load_environment_vars(sql.as_ref(), environment).await?;
            // Values pinned in the configuration win over what the environment reports.
            if let Some(pinned) = self.env_vars.remove(&environment) {
                vars.extend(pinned);
            }
            debug!(environment = %environment, vars = vars.len(), "Environment variables loaded");
            self.env_vars.insert(environment, vars);
        }
        Ok(())
    }

    async fn collect_databases(&mut self) -> Result<()> {
        let sql = self.gateways.sql()?.clone();
        let right_connected = self.connected.contains(&Environment::Right);
        for db in self.conversion.databases.values_mut() {
            if let Err(e) = discovery::collect_database(&self.config, sql.as_ref(), db, right_connected).await {
                self.status.add_error(MessageCode::MiscError, vec![format!("{:#}", e)]);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn collect_tables(&mut self) -> Result<()> {
        let sql = self.gateways.sql()?.clone();
        let filter = self.filter()?;
        let right_connected = self.connected.contains(&Environment::Right);
        for db in self.conversion.databases.values_mut() {
            if let Err(e) = discovery::collect_tables(&self.config, sql.as_ref(), &filter, db, right_connected).await {
                self.status.add_error(MessageCode::CollectingTables, vec![format!("{:#}", e)]);
                return Err(e);
            }
        }
        Ok(())
    }

    fn right_vars(&self) -> BTreeMap<String, String> {
        self.env_vars.get(&Environment::Right).cloned().unwrap_or_default()
    }

    async fn build_glm(&mut self) -> Result<()> {
        let plans = self.plans()?;
        if plans.is_dirty() {
            plans.mark_clean();
            // Sources gathered under the previous plans are collected again.
            for database in self.builder.gathered() {
                debug!(database = %database, "Warehouse plans changed; regathering sources");
                self.builder.reset(&database);
            }
        }
        let plans = self.plans()?.clone();
        let resolver = WarehouseResolver::new(&self.config, plans, &self.right_vars());
        for name in self.conversion.databases.keys() {
            match resolver.resolve(name) {
                Ok(Some(warehouse)) => {
                    if warehouse.source == WarehouseSource::Env {
                        self.status
                            .add_warning(MessageCode::WarehouseDirectoriesRetrievedFromHiveEnv, vec![name.clone()]);
                    }
                    self.warehouses.insert(name.clone(), warehouse);
                }
                Ok(None) => self
                    .status
                    .add_warning(MessageCode::WarehouseDirectoriesNotDefined, vec![name.clone()]),
                Err(e) => {
                    self.status.add_error(MessageCode::MissingDataPoint, vec![e.to_string()]);
                    return Err(anyhow::Error::new(e));
                }
            }
        }

        if !self.config.data_strategy.keeps_location() {
            for db in self.conversion.databases.values() {
                if self.builder.is_gathered(&db.name) {
                    continue;
                }
                if self.preloaded {
                    discovery::sources_from_database(&mut self.builder, db);
                } else if let Some(metastore) = &self.gateways.metastore {
                    if let Err(e) =
                        discovery::load_source_locations(&self.config, metastore.as_ref(), &mut self.builder, &db.name)
                            .await
                    {
                        self.status.add_error(MessageCode::GlmBuild, vec![format!("{:#}", e)]);
                        return Err(e);
                    }
                } else {
                    debug!(database = %db.name, "No metastore gateway; only configured location map entries apply");
                }
            }
            let entries = self
                .builder
                .build(&self.warehouses, self.config.conversions_possible());
            self.glm.set_auto(entries);
        }

        let glm = Arc::new(std::mem::take(&mut self.glm));
        info!(entries = glm.len(), warehouses = self.warehouses.len(), "Location map built");
        self.translator = Some(Arc::new(Translator::new(
            self.config.clone(),
            glm,
            Arc::new(self.warehouses.clone()),
            self.recorder.clone(),
        )));
        Ok(())
    }

    fn build_database_ddl(&mut self) -> Result<()> {
        let right_vars = self.right_vars();
        for db in self.conversion.databases.values_mut() {
            let warehouse = self.warehouses.get(&db.name);
            if let Err(e) = database::build_database_ddl(&self.config, db, warehouse, &right_vars) {
                let code = match e {
                    MirrorError::MissingDataPoint(_) => MessageCode::MissingDataPoint,
                    _ => MessageCode::DatabaseCreation,
                };
                self.status.add_error(code, vec![e.to_string()]);
                return Err(anyhow::Error::new(e).context(format!("Failed to build DDL for database {}", db.name)));
            }
            self.status.statistics.databases.incr_count();
        }
        Ok(())
    }

    fn filter(&self) -> Result<Arc<TableFilter>> {
        self.filter
            .clone()
            .ok_or_else(|| anyhow::Error::new(MirrorError::Stage("table filters are not built yet".to_string())))
    }

    fn unit_context(&self) -> Result<UnitContext> {
        let translator = self
            .translator
            .clone()
            .ok_or_else(|| anyhow::Error::new(MirrorError::Stage("the location map is not built yet".to_string())))?;
        Ok(UnitContext {
            config: self.config.clone(),
            status: self.status.clone(),
            gateways: self.gateways.clone(),
            strategy: self.strategy.clone(),
            translator,
            filter: self.filter()?,
            preloaded: self.preloaded,
        })
    }

    /// Loads every table's facts; each table that loads is handed straight to a
    /// build unit, which [`Stage::BuildTableDdl`] joins.
    async fn load_table_metadata(&mut self) -> Result<()> {
        let ctx = self.unit_context()?;
        let tables = self.conversion.take_active_tables();
        let databases: BTreeMap<String, Arc<DBMirror>> = self
            .conversion
            .databases
            .iter()
            .map(|(name, db)| (name.clone(), Arc::new(db.clone())))
            .collect();
        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        info!(tables = tables.len(), concurrency = self.config.concurrency, "Loading table metadata");

        let mut loads = JoinSet::new();
        for mirror in tables {
            let ctx = ctx.clone();
            let permits = permits.clone();
            loads.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (mirror, UnitResult::Fatal("worker pool closed".to_string()));
                };
                table::load_metadata(ctx, mirror).await
            });
        }

        // A fatal table stops new builds, but every running unit is joined so its table
        // returns to the tree.
        let mut fatal = None;
        while let Some(joined) = loads.join_next().await {
            let (mut mirror, result) = match joined {
                Ok(output) => output,
                Err(e) => {
                    fatal.get_or_insert(panicked(e));
                    continue;
                }
            };
            if !result.is_success() {
                if let Some(e) = self.settle(mirror, result, Environment::Left) {
                    fatal.get_or_insert(e);
                }
                continue;
            }
            if fatal.is_some() {
                mirror.exclude("run stopped after a fatal table failure");
                self.conversion.restore_table(mirror);
                continue;
            }
            let Some(database) = databases.get(&mirror.database).cloned() else {
                let reason = format!("database {} is not part of this run", mirror.database);
                self.settle(mirror, UnitResult::Error(reason), Environment::Left);
                continue;
            };
            let ctx = ctx.clone();
            let permits = permits.clone();
            self.builds.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (mirror, UnitResult::Fatal("worker pool closed".to_string()));
                };
                table::build(ctx, database, mirror).await
            });
        }
        fatal.map_or(Ok(()), Err)
    }

    async fn build_table_ddl(&mut self) -> Result<()> {
        self.join_builds().await.map_or(Ok(()), Err)
    }

    /// Joins every pending build unit and returns the first fatal failure.
    async fn join_builds(&mut self) -> Option<anyhow::Error> {
        let mut fatal = None;
        while let Some(joined) = self.builds.join_next().await {
            let next = match joined {
                Ok((mirror, result)) => self.settle(mirror, result, Environment::Right),
                Err(e) => Some(panicked(e)),
            };
            if let Some(e) = next {
                fatal.get_or_insert(e);
            }
        }
        fatal
    }

    /// Puts a finished unit's table back in the tree and applies its outcome.
    /// Returns the error to fail the stage with when the unit was fatal.
    fn settle(&mut self, mut mirror: TableMirror, result: UnitResult, environment: Environment) -> Option<anyhow::Error> {
        let tables = &self.status.statistics.tables;
        let fatal = match result {
            UnitResult::Success => None,
            UnitResult::Skip(reason) => {
                debug!(database = %mirror.database, table = %mirror.name, reason = %reason, "Table skipped");
                tables.incr_skipped();
                mirror.exclude(reason);
                None
            }
            UnitResult::Error(message) => {
                warn!(database = %mirror.database, table = %mirror.name, error = %message, "Table excluded");
                tables.incr_failure();
                mirror.add_error(environment, message.clone());
                mirror.exclude(message);
                self.excluded += 1;
                None
            }
            UnitResult::Fatal(message) => {
                error!(database = %mirror.database, table = %mirror.name, error = %message, "Table failed fatally");
                tables.incr_failure();
                let qualified = format!("{}.{}", mirror.database, mirror.name);
                self.status
                    .add_error(MessageCode::FatalTableFailure, vec![qualified.clone(), message.clone()]);
                mirror.add_error(environment, message.clone());
                mirror.exclude(message.clone());
                Some(anyhow::Error::new(MirrorError::Stage(format!("{} failed fatally: {}", qualified, message))))
            }
        };
        self.conversion.restore_table(mirror);
        fatal
    }

    fn validate_environment_sets(&mut self) -> Result<()> {
        let before = self.conversion.tables().filter(|t| t.is_active()).count();
        let collisions = table::validate_environment_sets(&self.config, &mut self.conversion);
        let after = self.conversion.tables().filter(|t| t.is_active()).count();
        for _ in after..before {
            self.status.statistics.tables.incr_failure();
        }
        if collisions > 0 {
            self.status
                .add_error(MessageCode::LocationCollision, vec![collisions.to_string()]);
        }
        self.excluded += before - after;

        if self.config.is_distcp() {
            self.build_distcp_plans();
        }
        Ok(())
    }

    fn build_distcp_plans(&mut self) {
        // Sources of tables that dropped out must not be copied.
        let dropped: BTreeSet<String> = self
            .conversion
            .tables()
            .filter(|t| t.remove)
            .filter_map(|t| t.left())
            .flat_map(|left| left.location().into_iter().chain(left.partitions.values().cloned()))
            .collect();
        let consolidate = self.config.transfer.storage_migration.consolidate_tables_for_distcp;

        for (database, environment) in self.recorder.recorded() {
            let levels: Vec<_> = self
                .recorder
                .levels(&database, environment)
                .into_iter()
                .filter(|level| !dropped.contains(&level.original))
                .collect();
            let plan = DistcpPlanBuilder::build(&database, environment, &levels, consolidate);
            if !plan.is_empty() {
                info!(database = %database, environment = %environment, entries = plan.entries.len(), "distcp plan built");
                self.distcp_plans.push(plan);
            }
        }
    }

    async fn execute_database_ddl(&mut self) -> Result<()> {
        let sql = self.gateways.sql()?.clone();
        for db in self.conversion.databases.values() {
            if let Err(e) = database::execute_database_ddl(sql.as_ref(), db).await {
                self.status.add_error(MessageCode::DatabaseCreation, vec![format!("{:#}", e)]);
                return Err(e);
            }
            self.status.statistics.databases.incr_success();
        }
        Ok(())
    }

    async fn execute_table_ddl(&mut self) -> Result<()> {
        let ctx = self.unit_context()?;
        let permits = Arc::new(Semaphore::new(self.config.transfer_concurrency));
        let mut units = JoinSet::new();
        for mirror in self.conversion.take_active_tables() {
            let ctx = ctx.clone();
            let permits = permits.clone();
            units.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (mirror, UnitResult::Fatal("worker pool closed".to_string()));
                };
                table::execute(ctx, mirror).await
            });
        }

        let mut failed = 0;
        let mut fatal = None;
        while let Some(joined) = units.join_next().await {
            let (mut mirror, result) = match joined {
                Ok(output) => output,
                Err(e) => {
                    fatal.get_or_insert(panicked(e));
                    continue;
                }
            };
            match result {
                UnitResult::Error(message) => {
                    warn!(database = %mirror.database, table = %mirror.name, error = %message, "Statements failed");
                    failed += 1;
                    self.status.statistics.tables.incr_failure();
                    mirror.exclude(message);
                    self.conversion.restore_table(mirror);
                }
                other => {
                    if let Some(e) = self.settle(mirror, other, Environment::Right) {
                        fatal.get_or_insert(e);
                    }
                }
            }
        }
        if failed > 0 {
            self.status
                .add_error(MessageCode::TableExecutionFailed, vec![failed.to_string()]);
        }
        fatal.map_or(Ok(()), Err)
    }

    /// Counts the tables still standing as successes, once.
    fn tally(&mut self) {
        if self.tallied {
            return;
        }
        self.tallied = true;
        for _ in self.conversion.tables().filter(|t| t.is_active()) {
            self.status.statistics.tables.incr_success();
        }
        if self.excluded > 0 {
            self.status
                .add_warning(MessageCode::TablesExcluded, vec![self.excluded.to_string()]);
        }
    }

    async fn save_reports(&mut self) -> Result<()> {
        self.tally();
        let Some(dir) = self.config.output_dir.clone() else {
            return Ok(());
        };
        let report = self.status.report();
        reports::save_reports(&dir, &self.conversion, &self.distcp_plans, &report).await?;
        Ok(())
    }

    fn finish(mut self) -> RunOutcome {
        self.tally();
        let success = !self.status.any_stage_errored() && !self.status.has_errors();
        let return_code = self.status.return_code();
        let report = self.status.report();
        if success {
            info!(tables = self.conversion.tables().filter(|t| t.is_active()).count(), "Migration run succeeded");
        } else {
            error!(return_code, errors = report.errors.len(), "Migration run failed");
        }
        RunOutcome {
            success,
            return_code,
            report,
            conversion: self.conversion,
            distcp_plans: self.distcp_plans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{SqlGateway, SqlSession};
    use crate::model::conversion::DB_LOCATION;
    use crate::model::TableStatistics;
    use crate::testing::{self, CatalogDatabase, InMemoryProbe, InMemorySql};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn preloaded(tables: Vec<TableMirror>) -> Conversion {
        let mut conversion = Conversion::default();
        conversion
            .add_database("sales")
            .set_property(Environment::Left, DB_LOCATION, "hdfs://ns1/warehouse/sales.db");
        for mirror in tables {
            conversion.restore_table(mirror);
        }
        conversion
    }

    /// Drops the connection when a statement matches `fragment`; stalls on `slow`.
    struct LostConnection {
        inner: InMemorySql,
        fragment: &'static str,
        slow: Option<&'static str>,
    }

    struct LostSession {
        inner: Box<dyn SqlSession>,
        fragment: &'static str,
        slow: Option<&'static str>,
    }

    #[async_trait]
    impl SqlGateway for LostConnection {
        async fn session(&self, environment: Environment) -> Result<Box<dyn SqlSession>> {
            let inner = self.inner.session(environment).await?;
            Ok(Box::new(LostSession {
                inner,
                fragment: self.fragment,
                slow: self.slow,
            }))
        }
    }

    #[async_trait]
    impl SqlSession for LostSession {
        async fn execute(&mut self, statement: &str) -> Result<Vec<crate::gateway::Row>> {
            if statement.contains(self.fragment) {
                return Err(anyhow::Error::new(MirrorError::Connection("connection reset".to_string())));
            }
            if self.slow.is_some_and(|slow| statement.contains(slow)) {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            self.inner.execute(statement).await
        }
    }

    #[tokio::test]
    async fn test_preloaded_schema_only_run() {
        let config = testing::config(DataStrategyKind::SchemaOnly);
        let conversion = preloaded(vec![
            testing::external_table("sales", "orders", "hdfs://ns1/data/orders"),
            testing::managed_table("sales", "acid", "hdfs://ns1/warehouse/sales.db/acid", true),
        ]);

        let outcome = Coordinator::new(config, Gateways::default())
            .with_conversion(conversion)
            .run()
            .await;

        assert!(outcome.success, "{:?}", outcome.report.errors);
        assert_eq!(outcome.return_code, 0);
        assert_eq!(outcome.report.stages[&Stage::Connect], StageStatus::Skipped);
        assert_eq!(outcome.report.stages[&Stage::BuildTableDdl], StageStatus::Completed);

        let db = outcome.conversion.database("sales").unwrap();
        let orders = &db.tables["orders"];
        assert!(orders.is_active());
        let right = orders.environment_table(Environment::Right).unwrap();
        assert!(right.location().unwrap().starts_with("hdfs://ns2"));
        assert!(!db.tables["acid"].is_active());
        assert!(db.sql_for(Environment::Right)[0].action.starts_with("CREATE DATABASE IF NOT EXISTS sales"));

        let tables = outcome.report.statistics.tables;
        assert_eq!(tables.count, 2);
        assert_eq!(tables.successes, 1);
        assert_eq!(tables.skipped, 1);
    }

    #[tokio::test]
    async fn test_table_error_excludes_but_run_succeeds() {
        let config = testing::config(DataStrategyKind::SchemaOnly);
        let mut ghost = TableMirror::new("sales", "ghost");
        ghost.environment_table_mut(Environment::Left).exists = true;
        let conversion = preloaded(vec![
            testing::external_table("sales", "orders", "hdfs://ns1/data/orders"),
            ghost,
        ]);

        let coordinator = Coordinator::new(config, Gateways::default()).with_conversion(conversion);
        let status = coordinator.status();
        let outcome = coordinator.spawn().await.unwrap();

        assert!(outcome.success);
        assert!(status.has_warning(MessageCode::TablesExcluded));
        let db = outcome.conversion.database("sales").unwrap();
        assert!(db.tables["orders"].is_active());
        let ghost = &db.tables["ghost"];
        assert!(!ghost.is_active());
        assert!(ghost.has_errors());
    }

    #[tokio::test]
    async fn test_fatal_table_fails_run() {
        let config = testing::config(DataStrategyKind::SchemaOnly);
        let catalog = CatalogDatabase::located("hdfs://ns1/warehouse/sales.db")
            .with_table("orders", testing::external_definition("orders", "hdfs://ns1/data/orders"))
            .with_table("broken", testing::external_definition("broken", "hdfs://ns1/data/broken"));
        let sql = LostConnection {
            inner: InMemorySql::default().with_database(Environment::Left, "sales", catalog),
            fragment: "SHOW CREATE TABLE sales.broken",
            slow: None,
        };
        let gateways = Gateways {
            sql: Some(Arc::new(sql)),
            ..Default::default()
        };

        let coordinator = Coordinator::new(config, gateways);
        let status = coordinator.status();
        let outcome = coordinator.run().await;

        assert!(!outcome.success);
        assert_ne!(outcome.return_code, 0);
        assert!(status.has_error(MessageCode::FatalTableFailure));
        assert_eq!(outcome.report.stages[&Stage::LoadTableMetadata], StageStatus::Errored);
        assert_eq!(outcome.report.stages[&Stage::ExecuteTableDdl], StageStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_fatal_table_keeps_in_flight_tables() {
        let dir = TempDir::new().unwrap();
        let mut config = testing::config(DataStrategyKind::SchemaOnly);
        config.output_dir = Some(dir.path().to_path_buf());
        let catalog = CatalogDatabase::located("hdfs://ns1/warehouse/sales.db")
            .with_table("orders", testing::external_definition("orders", "hdfs://ns1/data/orders"))
            .with_table("broken", testing::external_definition("broken", "hdfs://ns1/data/broken"))
            .with_table("slow", testing::external_definition("slow", "hdfs://ns1/data/slow"));
        let sql = LostConnection {
            inner: InMemorySql::default().with_database(Environment::Left, "sales", catalog),
            fragment: "SHOW CREATE TABLE sales.broken",
            slow: Some("SHOW CREATE TABLE sales.slow"),
        };
        let gateways = Gateways {
            sql: Some(Arc::new(sql)),
            ..Default::default()
        };

        let outcome = Coordinator::new(config, gateways).run().await;

        assert!(!outcome.success);
        let db = outcome.conversion.database("sales").unwrap();
        for name in ["orders", "broken", "slow"] {
            assert!(db.tables.contains_key(name), "{} missing from the tree", name);
        }
        assert!(!db.tables["broken"].is_active());
        assert!(!db.tables["slow"].is_active());
        let snapshot = std::fs::read_to_string(dir.path().join("sales_hms-mirror.json")).unwrap();
        assert!(snapshot.contains("slow"));
    }

    #[tokio::test]
    async fn test_live_error_table_is_not_executed() {
        let mut config = testing::config(DataStrategyKind::SchemaOnly);
        config.execute = true;
        let catalog = CatalogDatabase::located("hdfs://ns1/warehouse/sales.db")
            .with_table("orders", testing::external_definition("orders", "hdfs://ns1/data/orders"))
            .with_table("ghost", vec![]);
        let sql = InMemorySql::default().with_database(Environment::Left, "sales", catalog);
        let gateways = Gateways {
            sql: Some(Arc::new(sql.clone())),
            ..Default::default()
        };

        let coordinator = Coordinator::new(config, gateways);
        let status = coordinator.status();
        let outcome = coordinator.run().await;

        assert!(outcome.success, "{:?}", outcome.report.errors);
        assert!(status.has_warning(MessageCode::TablesExcluded));
        assert_eq!(outcome.report.stages[&Stage::ExecuteTableDdl], StageStatus::Completed);
        let executed = sql.executed();
        assert!(executed
            .iter()
            .any(|(env, s)| *env == Environment::Right && s.contains("CREATE EXTERNAL TABLE `orders`")));
        assert!(executed
            .iter()
            .filter(|(env, _)| *env == Environment::Right)
            .all(|(_, s)| !s.contains("ghost")));
        assert!(!outcome.conversion.database("sales").unwrap().tables["ghost"].is_active());
    }

    #[tokio::test]
    async fn test_live_run_executes_and_saves_reports() {
        let dir = TempDir::new().unwrap();
        let mut config = testing::config(DataStrategyKind::SchemaOnly);
        config.execute = true;
        config.collect_stats = true;
        config.output_dir = Some(dir.path().to_path_buf());

        let catalog = CatalogDatabase::located("hdfs://ns1/warehouse/sales.db")
            .with_table("orders", testing::external_definition("orders", "hdfs://ns1/data/orders"));
        let sql = InMemorySql::default().with_database(Environment::Left, "sales", catalog);
        let mut probe = InMemoryProbe::default();
        probe
            .summaries
            .insert("hdfs://ns1/data/orders".to_string(), TableStatistics::new(2, 1, 20));
        let gateways = Gateways {
            sql: Some(Arc::new(sql.clone())),
            metastore: None,
            probe: Some(Arc::new(probe)),
        };

        let outcome = Coordinator::new(config, gateways).run().await;
        assert!(outcome.success, "{:?}", outcome.report.errors);

        let executed = sql.executed();
        assert!(executed
            .iter()
            .any(|(env, s)| *env == Environment::Right && s.starts_with("CREATE DATABASE IF NOT EXISTS sales")));
        assert!(executed.iter().any(|(env, s)| *env == Environment::Right
            && s.contains("CREATE EXTERNAL TABLE `orders`")
            && s.contains("hdfs://ns2/data/orders")));
        assert!(dir.path().join("sales_hms-mirror.json").exists());
        assert!(dir.path().join(reports::RUN_STATUS_FILE).exists());
        assert_eq!(outcome.report.stages[&Stage::ExecuteTableDdl], StageStatus::Completed);
    }

    #[tokio::test]
    async fn test_unreachable_right_fails_connect() {
        let config = testing::config(DataStrategyKind::SchemaOnly);
        let sql = InMemorySql::default()
            .with_database(Environment::Left, "sales", CatalogDatabase::located("hdfs://ns1/warehouse/sales.db"))
            .unreachable(Environment::Right);
        let gateways = Gateways {
            sql: Some(Arc::new(sql)),
            ..Default::default()
        };

        let outcome = Coordinator::new(config, gateways).run().await;
        assert!(!outcome.success);
        assert_eq!(outcome.report.stages[&Stage::Connect], StageStatus::Errored);
        assert_eq!(outcome.report.stages[&Stage::GatherDatabases], StageStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_disconnected_right_is_a_warning() {
        let mut config = testing::config(DataStrategyKind::SchemaOnly);
        if let Some(right) = config.clusters.get_mut(&Environment::Right) {
            right.disconnected = true;
        }
        let catalog = CatalogDatabase::located("hdfs://ns1/warehouse/sales.db")
            .with_table("orders", testing::external_definition("orders", "hdfs://ns1/data/orders"));
        let sql = InMemorySql::default()
            .with_database(Environment::Left, "sales", catalog)
            .unreachable(Environment::Right);
        let gateways = Gateways {
            sql: Some(Arc::new(sql)),
            ..Default::default()
        };

        let coordinator = Coordinator::new(config, gateways);
        let status = coordinator.status();
        let outcome = coordinator.run().await;
        assert!(outcome.success, "{:?}", outcome.report.errors);
        assert!(status.has_warning(MessageCode::EnvironmentDisconnected));
        assert!(outcome.conversion.database("sales").unwrap().tables["orders"].is_active());
    }

    #[tokio::test]
    async fn test_invalid_config_stops_before_connecting() {
        let mut config = testing::config(DataStrategyKind::SchemaOnly);
        config.table_regex = Some("(".to_string());
        let outcome = Coordinator::new(config, Gateways::default()).run().await;
        assert!(!outcome.success);
        assert_eq!(outcome.report.stages[&Stage::ValidateConfig], StageStatus::Errored);
        assert_eq!(outcome.report.stages[&Stage::Connect], StageStatus::NotStarted);
        assert!(outcome.report.errors.iter().any(|e| e.contains("(")));
    }

    #[tokio::test]
    async fn test_changed_warehouse_plan_regathers_sources() {
        let config = testing::config(DataStrategyKind::SchemaOnly);
        let conversion = preloaded(vec![testing::external_table("sales", "orders", "hdfs://ns1/data/orders")]);
        let mut coordinator = Coordinator::new(config, Gateways::default()).with_conversion(conversion);
        coordinator
            .builder
            .add_table_source("sales", "stale", TableType::External, "hdfs://ns1/old/stale");
        coordinator.builder.mark_gathered("sales");

        coordinator.add_warehouse_plan("sales", "/wh2/ext", "/wh2/mgd").unwrap();
        coordinator.build_glm().await.unwrap();

        assert!(coordinator.builder.is_gathered("sales"));
        let sources: Vec<&str> = coordinator
            .builder
            .sources("sales")
            .unwrap()
            .sources(TableType::External)
            .collect();
        assert!(sources.iter().all(|s| !s.contains("/old")), "{:?}", sources);
        assert_eq!(coordinator.warehouses["sales"].external_directory, "/wh2/ext");
        assert!(!coordinator.plans.as_ref().unwrap().is_dirty());

        assert!(coordinator.remove_warehouse_plan("sales").unwrap().is_some());
        assert!(coordinator.plans.as_ref().unwrap().is_dirty());
    }

    #[tokio::test]
    async fn test_distcp_plan_for_storage_migration() {
        let mut config = testing::config(DataStrategyKind::StorageMigration);
        config.transfer.storage_migration.distcp = true;
        config.transfer.target_namespace = Some("hdfs://ns3".to_string());
        config.clusters.remove(&Environment::Right);
        let conversion = preloaded(vec![testing::external_table(
            "sales",
            "orders",
            "hdfs://ns1/warehouse/sales.db/orders",
        )]);

        let outcome = Coordinator::new(config, Gateways::default())
            .with_conversion(conversion)
            .run()
            .await;
        assert!(outcome.success, "{:?}", outcome.report.errors);
        assert_eq!(outcome.distcp_plans.len(), 1);
        let plan = &outcome.distcp_plans[0];
        assert_eq!(plan.environment, Environment::Left);
        assert!(plan.index.keys().all(|target| target.starts_with("hdfs://ns3")));
    }
}
