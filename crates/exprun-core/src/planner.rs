//! Decides which warehouse queries a results run issues.
//!
//! Sources that support separate experiment-result queries get an optional
//! units table, one query per selected metric and one traffic query. Every
//! other source gets a single combined `results` query whose rows are
//! reshaped by [`crate::legacy::process_legacy_rows`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::dispatcher::{keep_rows, QueryDispatcher, QuerySpec};
use crate::domain::{
    Dimension, DimensionKind, MetricDefinition, QueryError, QueryPayload, QueryPointer,
    ResultsError, Result, Segment, SnapshotSettings, TrafficRow,
};
use crate::integration::{
    DimensionCatalog, EntitlementPolicy, LegacyQueryParams, MetricCatalog, MetricQueryParams,
    SegmentCatalog, SourceIntegration, UnitsQueryParams, PIPELINE_MODE_FEATURE,
};
use crate::legacy::{process_legacy_rows, LegacyRow};

/// Name of the aggregate traffic query. The aggregator reads health data
/// from the query registered under this name.
pub const TRAFFIC_QUERY_NAME: &str = "traffic";

/// Name of the combined query issued to legacy sources.
pub const LEGACY_QUERY_NAME: &str = "results";

/// Prefix of the temporary units table; the query parent id is appended.
pub const UNITS_TABLE_PREFIX: &str = "exprun_tmp_units_";

/// Inputs of one planning pass.
#[derive(Debug, Clone)]
pub struct ResultsQueryParams {
    pub organization: String,
    /// Names the units table and its query. Usually the snapshot id.
    pub query_parent_id: String,
    pub settings: SnapshotSettings,
    pub metrics: MetricCatalog,
}

/// Catalog and policy lookups needed while planning.
#[derive(Clone)]
pub struct Collaborators {
    pub segments: Arc<dyn SegmentCatalog>,
    pub dimensions: Arc<dyn DimensionCatalog>,
    pub entitlements: Arc<dyn EntitlementPolicy>,
}

impl Collaborators {
    /// Use one object for every lookup.
    pub fn from_shared<C>(catalog: Arc<C>) -> Self
    where
        C: SegmentCatalog + DimensionCatalog + EntitlementPolicy + 'static,
    {
        Self {
            segments: catalog.clone(),
            dimensions: catalog.clone(),
            entitlements: catalog,
        }
    }
}

/// Register every query of the run on `dispatcher`.
///
/// Preconditions are checked before the first query is started, so an
/// `Err` from a precondition means nothing was dispatched.
#[instrument(skip_all, fields(query_parent_id = %params.query_parent_id))]
pub async fn start_queries(
    params: &ResultsQueryParams,
    integration: Arc<dyn SourceIntegration>,
    collaborators: &Collaborators,
    dispatcher: &QueryDispatcher,
) -> Result<Vec<QueryPointer>> {
    let settings = &params.settings;

    let selected = params.metrics.resolve(settings.selected_metric_ids());
    if selected.is_empty() {
        return Err(ResultsError::NoMetricsSelected);
    }

    let activation_metric = settings
        .activation_metric
        .as_deref()
        .and_then(|id| params.metrics.get(id))
        .cloned();

    let segment = match settings.segment.as_deref() {
        Some(id) => {
            collaborators
                .segments
                .find_segment(&params.organization, id)
                .await
        }
        None => None,
    };

    let dimension = match settings.first_dimension_id() {
        Some(id) => {
            collaborators
                .dimensions
                .resolve_dimension(&params.organization, id)
                .await
        }
        None => None,
    };

    let plan = Plan {
        selected,
        activation_metric,
        segment,
        dimension,
    };

    if integration.source_properties().separate_experiment_result_queries {
        start_separated(params, integration, collaborators, dispatcher, plan).await
    } else {
        start_legacy(params, integration, dispatcher, plan)
    }
}

struct Plan {
    selected: Vec<MetricDefinition>,
    activation_metric: Option<MetricDefinition>,
    segment: Option<Segment>,
    dimension: Option<Dimension>,
}

async fn start_separated(
    params: &ResultsQueryParams,
    integration: Arc<dyn SourceIntegration>,
    collaborators: &Collaborators,
    dispatcher: &QueryDispatcher,
    plan: Plan,
) -> Result<Vec<QueryPointer>> {
    let has_pipeline_mode = collaborators
        .entitlements
        .org_has_feature(&params.organization, PIPELINE_MODE_FEATURE)
        .await;

    let pipeline = integration.pipeline_settings().unwrap_or_default();
    let write_dataset = pipeline.writable_dataset();
    let use_units_table = integration.source_properties().supports_writing_tables
        && has_pipeline_mode
        && write_dataset.is_some();

    let units_table_full_name = match (use_units_table, write_dataset) {
        (true, Some(dataset)) => {
            let table = format!("{UNITS_TABLE_PREFIX}{}", params.query_parent_id);
            integration
                .generate_table_path(&table, dataset)
                .ok_or(ResultsError::TablePathUnavailable)?
        }
        _ => String::new(),
    };

    let dimensions = match &plan.dimension {
        Some(d) => vec![d.clone()],
        None => exposure_dimensions(integration.as_ref(), &params.settings),
    };

    let units_params = UnitsQueryParams {
        settings: params.settings.clone(),
        activation_metric: plan.activation_metric.clone(),
        dimensions,
        segment: plan.segment.clone(),
        units_table_full_name: units_table_full_name.clone(),
        use_units_table,
        include_id_joins: true,
    };

    let mut started = Vec::new();

    let units_dependency: Vec<String> = if use_units_table {
        let source = Arc::clone(&integration);
        let pointer = dispatcher.start_query(QuerySpec::new(
            params.query_parent_id.as_str(),
            integration.units_table_query(&units_params),
            Vec::new(),
            move |query: String| async move { source.run_units_query(&query).await },
            keep_rows,
        ))?;
        info!(table = %units_table_full_name, "units table query started");
        started.push(pointer);
        vec![params.query_parent_id.clone()]
    } else {
        Vec::new()
    };

    for metric in plan.selected {
        let metric_params = MetricQueryParams {
            settings: params.settings.clone(),
            denominator_metrics: params.metrics.denominator_chain(&metric.id),
            metric,
            activation_metric: plan.activation_metric.clone(),
            dimension: plan.dimension.clone(),
            segment: plan.segment.clone(),
            use_units_table,
            units_table_full_name: units_table_full_name.clone(),
        };
        let source = Arc::clone(&integration);
        let pointer = dispatcher.start_query(QuerySpec::new(
            metric_params.metric.id.as_str(),
            integration.metric_query(&metric_params),
            units_dependency.clone(),
            move |query: String| async move { source.run_metric_query(&query).await },
            keep_rows,
        ))?;
        started.push(pointer);
    }

    let source = Arc::clone(&integration);
    let pointer = dispatcher.start_query(QuerySpec::new(
        TRAFFIC_QUERY_NAME,
        integration.aggregate_units_query(&units_params),
        units_dependency,
        move |query: String| async move { source.run_aggregate_units_query(&query).await },
        parse_traffic_rows,
    ))?;
    started.push(pointer);

    debug!(queries = started.len(), use_units_table, "separated queries started");
    Ok(started)
}

fn start_legacy(
    params: &ResultsQueryParams,
    integration: Arc<dyn SourceIntegration>,
    dispatcher: &QueryDispatcher,
    plan: Plan,
) -> Result<Vec<QueryPointer>> {
    let legacy_params = LegacyQueryParams {
        settings: params.settings.clone(),
        metrics: plan.selected,
        activation_metric: plan.activation_metric,
        dimension: plan
            .dimension
            .filter(|d| d.kind == DimensionKind::User)
            .map(|d| d.id),
    };

    let query = integration.legacy_results_query(&legacy_params);
    let settings = params.settings.clone();
    let pointer = dispatcher.start_query(QuerySpec::new(
        LEGACY_QUERY_NAME,
        query,
        Vec::new(),
        move |_query: String| async move { integration.run_legacy_results(&legacy_params).await },
        move |rows: Vec<Value>| parse_legacy_rows(&settings, rows),
    ))?;

    debug!("legacy results query started");
    Ok(vec![pointer])
}

/// Experiment dimensions declared by the settings' exposure query.
fn exposure_dimensions(
    integration: &dyn SourceIntegration,
    settings: &SnapshotSettings,
) -> Vec<Dimension> {
    integration
        .exposure_queries()
        .into_iter()
        .find(|q| q.id == settings.exposure_query_id)
        .map(|q| q.dimensions.into_iter().map(Dimension::experiment).collect())
        .unwrap_or_default()
}

fn parse_traffic_rows(rows: Vec<Value>) -> std::result::Result<QueryPayload, QueryError> {
    let rows = rows
        .into_iter()
        .map(serde_json::from_value::<TrafficRow>)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(QueryPayload::Traffic(rows))
}

fn parse_legacy_rows(
    settings: &SnapshotSettings,
    rows: Vec<Value>,
) -> std::result::Result<QueryPayload, QueryError> {
    let rows = rows
        .into_iter()
        .map(serde_json::from_value::<LegacyRow>)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(QueryPayload::Legacy(process_legacy_rows(settings, rows)))
}
