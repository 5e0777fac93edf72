//! 查询计划
//!
//! 计划节点是不可变、可重复使用的描述；`run()` 每次产出一个新的一次性算子。
//!
//! ```text
//! InstanceResponsePlanNode
//!   └─ CombinePlanNode ── 每个段一个 SegmentPlanNode
//!        └─ Aggregation | AggregationGroupBy | Selection
//!             └─ Projection ─ DocIdSet ─ Filter | StarTreeFilter
//! ```
//!
//! 段数不超过 `min_segments_per_thread` 时在调用线程顺序规划；否则按
//! `threads = min(ceil(n / m), max_plan_threads)`、
//! `ops_per_thread = max(ceil(n / threads), m)` 切成连续分片并行规划。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use crate::common::{DictId, OlapError, Result};
use crate::config::{QueryExecutorConfig, MAX_DOC_PER_CALL};
use crate::query::executor::{CancellationToken, QueryExecutorService, Task};
use crate::query::operator::{
    AggregationGroupByOperator, AggregationOperator, CombineOperator, DocIdSetOperator, FilterOperator,
    InstanceResponseOperator, ProjectionOperator, SegmentOperator, SelectionOperator,
};
use crate::query::predicate::PredicateEvaluator;
use crate::query::request::{AggregationInfo, FilterNode, OrderBy, QueryRequest};
use crate::segment::{DataSource, IndexSegment};
use crate::startree::function_pair::STAR_COLUMN;
use crate::startree::{StarTree, StarTreeFilterOperator};

pub trait PlanNode {
    type Operator;

    fn run(&self) -> Result<Self::Operator>;

    /// 以 `prefix` 缩进打印计划树
    fn show_tree(&self, prefix: &str) -> String;
}

fn child_prefix(prefix: &str) -> String { format!("{prefix}  ") }

// ── 过滤 ──────────────────────────────────────────────────────────────────────

pub struct FilterPlanNode {
    segment: Arc<dyn IndexSegment>,
    filter:  Option<FilterNode>,
}

impl FilterPlanNode {
    pub fn new(segment: Arc<dyn IndexSegment>, filter: Option<FilterNode>) -> Self {
        Self { segment, filter }
    }
}

impl PlanNode for FilterPlanNode {
    type Operator = FilterOperator;

    fn run(&self) -> Result<FilterOperator> {
        FilterOperator::build(self.filter.as_ref(), self.segment.as_ref())
    }

    fn show_tree(&self, prefix: &str) -> String {
        match &self.filter {
            Some(f) => format!("{prefix}Filter({f:?})\n"),
            None => format!("{prefix}Filter(match all)\n"),
        }
    }
}

/// 只含 AND 连接谓词的过滤下推到星型树
pub struct StarTreeFilterPlanNode {
    star_tree:        Arc<StarTree>,
    filter:           Option<FilterNode>,
    group_by_columns: HashSet<String>,
}

impl StarTreeFilterPlanNode {
    pub fn new(star_tree: Arc<StarTree>, filter: Option<FilterNode>, group_by_columns: HashSet<String>) -> Self {
        Self { star_tree, filter, group_by_columns }
    }

    /// 维度 → 匹配的 dict_id（同一维度多个谓词取交集）
    fn matching_dict_ids(&self) -> Result<HashMap<String, Vec<DictId>>> {
        let mut out: HashMap<String, Vec<DictId>> = HashMap::new();
        let Some(filter) = &self.filter else { return Ok(out) };
        let conjuncts = filter.conjuncts()
            .ok_or_else(|| OlapError::Internal("star-tree filter over a non-conjunctive filter".into()))?;
        for (column, predicate) in conjuncts {
            let source = self.star_tree.data_source(column)?;
            let dictionary = source.dictionary()
                .ok_or_else(|| OlapError::Internal(format!("star-tree dimension {column} has no dictionary")))?;
            let ids = PredicateEvaluator::new(predicate, dictionary)?.matching_dict_ids();
            match out.get_mut(column) {
                Some(existing) => existing.retain(|id| ids.binary_search(id).is_ok()),
                None => {
                    out.insert(column.to_string(), ids);
                }
            }
        }
        Ok(out)
    }
}

impl PlanNode for StarTreeFilterPlanNode {
    type Operator = FilterOperator;

    fn run(&self) -> Result<FilterOperator> {
        Ok(FilterOperator::StarTree(StarTreeFilterOperator::new(
            Arc::clone(&self.star_tree),
            self.matching_dict_ids()?,
            self.group_by_columns.clone(),
        )))
    }

    fn show_tree(&self, prefix: &str) -> String {
        let mut group_by: Vec<&String> = self.group_by_columns.iter().collect();
        group_by.sort();
        format!(
            "{prefix}StarTreeFilter(dims: {:?}, filter: {:?}, groupBy: {group_by:?})\n",
            self.star_tree.dimension_names(), self.filter,
        )
    }
}

// ── DocIdSet / Projection ─────────────────────────────────────────────────────

pub type FilterPlan = Box<dyn PlanNode<Operator = FilterOperator> + Send + Sync>;

pub struct DocIdSetPlanNode {
    filter:           FilterPlan,
    max_doc_per_call: usize,
}

impl DocIdSetPlanNode {
    pub fn new(filter: FilterPlan, max_doc_per_call: usize) -> Result<Self> {
        if max_doc_per_call == 0 || max_doc_per_call > MAX_DOC_PER_CALL {
            return Err(OlapError::Config(format!(
                "maxDocPerCall must be in (0, {MAX_DOC_PER_CALL}], got {max_doc_per_call}",
            )));
        }
        Ok(Self { filter, max_doc_per_call })
    }
}

impl PlanNode for DocIdSetPlanNode {
    type Operator = DocIdSetOperator;

    fn run(&self) -> Result<DocIdSetOperator> {
        Ok(DocIdSetOperator::new(self.filter.run()?, self.max_doc_per_call))
    }

    fn show_tree(&self, prefix: &str) -> String {
        format!("{prefix}DocIdSet(maxDocPerCall: {})\n{}", self.max_doc_per_call, self.filter.show_tree(&child_prefix(prefix)))
    }
}

/// 投影列的来源：段本身或某棵星型树
#[derive(Clone)]
pub enum ColumnProvider {
    Segment(Arc<dyn IndexSegment>),
    StarTree(Arc<StarTree>),
}

impl ColumnProvider {
    fn data_source(&self, column: &str) -> Result<Arc<DataSource>> {
        match self {
            Self::Segment(s)  => s.data_source(column),
            Self::StarTree(t) => t.data_source(column).cloned(),
        }
    }
}

pub struct ProjectionPlanNode {
    provider:   ColumnProvider,
    columns:    Vec<String>,
    doc_id_set: DocIdSetPlanNode,
}

impl ProjectionPlanNode {
    pub fn new(provider: ColumnProvider, columns: Vec<String>, doc_id_set: DocIdSetPlanNode) -> Self {
        Self { provider, columns, doc_id_set }
    }
}

impl PlanNode for ProjectionPlanNode {
    type Operator = ProjectionOperator;

    fn run(&self) -> Result<ProjectionOperator> {
        let mut sources = HashMap::with_capacity(self.columns.len());
        for column in &self.columns {
            sources.insert(column.clone(), self.provider.data_source(column)?);
        }
        Ok(ProjectionOperator::new(self.doc_id_set.run()?, sources))
    }

    fn show_tree(&self, prefix: &str) -> String {
        let name = match self.provider {
            ColumnProvider::Segment(_)  => "Projection",
            ColumnProvider::StarTree(_) => "StarTreeProjection",
        };
        format!("{prefix}{name}({})\n{}", self.columns.join(", "), self.doc_id_set.show_tree(&child_prefix(prefix)))
    }
}

// ── 段级计划 ──────────────────────────────────────────────────────────────────

pub struct AggregationPlanNode {
    projection:   ProjectionPlanNode,
    aggregations: Vec<AggregationInfo>,
    star_tree:    bool,
    total_docs:   u64,
}

impl PlanNode for AggregationPlanNode {
    type Operator = AggregationOperator;

    fn run(&self) -> Result<AggregationOperator> {
        Ok(AggregationOperator::new(self.projection.run()?, self.aggregations.clone(), self.star_tree, self.total_docs))
    }

    fn show_tree(&self, prefix: &str) -> String {
        let names: Vec<String> = self.aggregations.iter().map(AggregationInfo::result_name).collect();
        format!("{prefix}Aggregation({})\n{}", names.join(", "), self.projection.show_tree(&child_prefix(prefix)))
    }
}

pub struct AggregationGroupByPlanNode {
    projection:       ProjectionPlanNode,
    aggregations:     Vec<AggregationInfo>,
    group_by:         Vec<String>,
    num_groups_limit: usize,
    star_tree:        bool,
    total_docs:       u64,
}

impl PlanNode for AggregationGroupByPlanNode {
    type Operator = AggregationGroupByOperator;

    fn run(&self) -> Result<AggregationGroupByOperator> {
        Ok(AggregationGroupByOperator::new(
            self.projection.run()?,
            self.aggregations.clone(),
            self.group_by.clone(),
            self.num_groups_limit,
            self.star_tree,
            self.total_docs,
        ))
    }

    fn show_tree(&self, prefix: &str) -> String {
        let names: Vec<String> = self.aggregations.iter().map(AggregationInfo::result_name).collect();
        format!(
            "{prefix}AggregationGroupBy({} by {})\n{}",
            names.join(", "), self.group_by.join(", "), self.projection.show_tree(&child_prefix(prefix)),
        )
    }
}

pub struct SelectionPlanNode {
    projection: ProjectionPlanNode,
    columns:    Vec<String>,
    order_by:   Vec<OrderBy>,
    limit:      usize,
    total_docs: u64,
}

impl PlanNode for SelectionPlanNode {
    type Operator = SelectionOperator;

    fn run(&self) -> Result<SelectionOperator> {
        Ok(SelectionOperator::new(
            self.projection.run()?,
            self.columns.clone(),
            self.order_by.clone(),
            self.limit,
            self.total_docs,
        ))
    }

    fn show_tree(&self, prefix: &str) -> String {
        format!("{prefix}Selection(limit: {})\n{}", self.limit, self.projection.show_tree(&child_prefix(prefix)))
    }
}

pub enum SegmentPlanNode {
    Aggregation(AggregationPlanNode),
    GroupBy(AggregationGroupByPlanNode),
    Selection(SelectionPlanNode),
}

impl PlanNode for SegmentPlanNode {
    type Operator = SegmentOperator;

    fn run(&self) -> Result<SegmentOperator> {
        Ok(match self {
            Self::Aggregation(n) => SegmentOperator::Aggregation(n.run()?),
            Self::GroupBy(n)     => SegmentOperator::GroupBy(n.run()?),
            Self::Selection(n)   => SegmentOperator::Selection(n.run()?),
        })
    }

    fn show_tree(&self, prefix: &str) -> String {
        match self {
            Self::Aggregation(n) => n.show_tree(prefix),
            Self::GroupBy(n)     => n.show_tree(prefix),
            Self::Selection(n)   => n.show_tree(prefix),
        }
    }
}

// ── 合并与实例响应 ─────────────────────────────────────────────────────────────

pub struct CombinePlanNode {
    plan_nodes:              Vec<Arc<SegmentPlanNode>>,
    request:                 Arc<QueryRequest>,
    executor:                Arc<QueryExecutorService>,
    min_segments_per_thread: usize,
    max_plan_threads:        usize,
    planning_deadline:       Instant,
    query_deadline:          Instant,
    num_groups_limit:        usize,
}

impl CombinePlanNode {
    /// 并行规划的 (线程数, 每线程计划数)；None 表示顺序规划
    pub fn shard_layout(num_nodes: usize, min_per_thread: usize, max_threads: usize) -> Option<(usize, usize)> {
        if num_nodes <= min_per_thread {
            return None;
        }
        let threads = num_nodes.div_ceil(min_per_thread).min(max_threads).max(1);
        let per_thread = num_nodes.div_ceil(threads).max(min_per_thread);
        Some((threads, per_thread))
    }
}

impl PlanNode for CombinePlanNode {
    type Operator = CombineOperator;

    fn run(&self) -> Result<CombineOperator> {
        let layout = Self::shard_layout(self.plan_nodes.len(), self.min_segments_per_thread, self.max_plan_threads);
        let operators = match layout {
            None => {
                let mut ops = Vec::with_capacity(self.plan_nodes.len());
                for node in &self.plan_nodes {
                    ops.push(node.run()?);
                }
                ops
            }
            Some((threads, per_thread)) => {
                debug!(segments = self.plan_nodes.len(), threads, per_thread, "planning segments in parallel");
                let tasks: Vec<Task<Vec<SegmentOperator>>> = self.plan_nodes.chunks(per_thread)
                    .map(|shard| {
                        let shard: Vec<Arc<SegmentPlanNode>> = shard.to_vec();
                        Box::new(move |token: &CancellationToken| {
                            let mut ops = Vec::with_capacity(shard.len());
                            for node in &shard {
                                if token.is_cancelled() {
                                    return Err(OlapError::Internal("planning cancelled".into()));
                                }
                                ops.push(node.run()?);
                            }
                            Ok(ops)
                        }) as Task<Vec<SegmentOperator>>
                    })
                    .collect();
                self.executor.run_with_deadline(tasks, self.planning_deadline, "segment planning")?
                    .into_iter().flatten().collect()
            }
        };
        Ok(CombineOperator::new(
            operators,
            Arc::clone(&self.request),
            Arc::clone(&self.executor),
            self.query_deadline,
            self.num_groups_limit,
        ))
    }

    fn show_tree(&self, prefix: &str) -> String {
        let mut out = format!("{prefix}Combine(segments: {})\n", self.plan_nodes.len());
        for node in &self.plan_nodes {
            out.push_str(&node.show_tree(&child_prefix(prefix)));
        }
        out
    }
}

pub struct InstanceResponsePlanNode {
    combine: CombinePlanNode,
}

impl PlanNode for InstanceResponsePlanNode {
    type Operator = InstanceResponseOperator;

    fn run(&self) -> Result<InstanceResponseOperator> {
        let start = Instant::now();
        let combine = self.combine.run()?;
        Ok(InstanceResponseOperator::new(combine, start.elapsed().as_millis() as u64))
    }

    fn show_tree(&self, prefix: &str) -> String {
        format!("{prefix}InstanceResponse\n{}", self.combine.show_tree(&child_prefix(prefix)))
    }
}

// ── 计划生成 ──────────────────────────────────────────────────────────────────

pub struct InstancePlanMaker {
    config: QueryExecutorConfig,
}

impl InstancePlanMaker {
    pub fn new(config: QueryExecutorConfig) -> Self { Self { config } }

    pub fn make_instance_plan(
        &self,
        request:  &QueryRequest,
        segments: &[Arc<dyn IndexSegment>],
        executor: Arc<QueryExecutorService>,
        deadline: Instant,
    ) -> Result<InstanceResponsePlanNode> {
        let plan_nodes = segments.iter()
            .map(|s| self.make_segment_plan(request, s).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let planning_deadline = (Instant::now() + Duration::from_millis(self.config.planning_timeout_ms)).min(deadline);
        Ok(InstanceResponsePlanNode {
            combine: CombinePlanNode {
                plan_nodes,
                request: Arc::new(request.clone()),
                executor,
                min_segments_per_thread: self.config.min_segments_per_thread,
                max_plan_threads: self.config.max_plan_threads,
                planning_deadline,
                query_deadline: deadline,
                num_groups_limit: request.options.num_groups_limit.unwrap_or(self.config.num_groups_limit),
            },
        })
    }

    pub fn make_segment_plan(&self, request: &QueryRequest, segment: &Arc<dyn IndexSegment>) -> Result<SegmentPlanNode> {
        let total_docs = segment.num_docs() as u64;
        if let Some(selection) = &request.selection {
            let columns: Vec<String> = if selection.columns.iter().any(|c| c == STAR_COLUMN) {
                segment.column_names()
            } else {
                selection.columns.clone()
            };
            let projection = self.projection(
                ColumnProvider::Segment(Arc::clone(segment)),
                columns.clone(),
                Box::new(FilterPlanNode::new(Arc::clone(segment), request.filter.clone())),
            )?;
            return Ok(SegmentPlanNode::Selection(SelectionPlanNode {
                projection,
                columns,
                order_by: selection.order_by.clone(),
                limit: selection.offset.saturating_add(selection.size),
                total_docs,
            }));
        }

        let group_by = request.group_by_columns().to_vec();
        let (projection, star_tree) = match self.select_star_tree(request, segment.as_ref()) {
            Some(tree) => {
                let mut columns: Vec<String> = request.aggregations.iter()
                    .flat_map(|a| a.function_column_pairs())
                    .map(|p| p.to_column_name())
                    .collect();
                columns.extend(group_by.iter().cloned());
                dedup(&mut columns);
                let filter = StarTreeFilterPlanNode::new(
                    Arc::clone(&tree), request.filter.clone(), group_by.iter().cloned().collect(),
                );
                (self.projection(ColumnProvider::StarTree(tree), columns, Box::new(filter))?, true)
            }
            None => {
                let mut columns: Vec<String> = request.aggregations.iter()
                    .filter(|a| a.column != STAR_COLUMN)
                    .map(|a| a.column.clone())
                    .collect();
                columns.extend(group_by.iter().cloned());
                dedup(&mut columns);
                let filter = FilterPlanNode::new(Arc::clone(segment), request.filter.clone());
                (self.projection(ColumnProvider::Segment(Arc::clone(segment)), columns, Box::new(filter))?, false)
            }
        };

        if request.is_group_by() {
            return Ok(SegmentPlanNode::GroupBy(AggregationGroupByPlanNode {
                projection,
                aggregations: request.aggregations.clone(),
                group_by,
                num_groups_limit: request.options.num_groups_limit.unwrap_or(self.config.num_groups_limit),
                star_tree,
                total_docs,
            }));
        }
        Ok(SegmentPlanNode::Aggregation(AggregationPlanNode {
            projection,
            aggregations: request.aggregations.clone(),
            star_tree,
            total_docs,
        }))
    }

    fn projection(&self, provider: ColumnProvider, columns: Vec<String>, filter: FilterPlan) -> Result<ProjectionPlanNode> {
        let doc_id_set = DocIdSetPlanNode::new(filter, self.config.max_doc_per_call)?;
        Ok(ProjectionPlanNode::new(provider, columns, doc_id_set))
    }

    /// 第一棵能回答该查询的星型树：过滤为纯 AND 且只涉及切分维度、
    /// group-by 列都是切分维度、所需的预聚合列都存在
    pub fn select_star_tree(&self, request: &QueryRequest, segment: &dyn IndexSegment) -> Option<Arc<StarTree>> {
        if !self.config.enable_star_tree || !request.is_aggregation() {
            return None;
        }
        let predicates = match &request.filter {
            Some(f) => f.conjuncts()?,
            None => Vec::new(),
        };
        segment.star_trees().iter()
            .find(|tree| {
                let dims = tree.dimension_names();
                let is_dim = |c: &str| dims.iter().any(|d| d == c);
                predicates.iter().all(|(c, _)| is_dim(c))
                    && request.group_by_columns().iter().all(|c| is_dim(c))
                    && request.aggregations.iter()
                        .all(|a| a.function_column_pairs().iter().all(|p| tree.has_pair(p)))
            })
            .cloned()
    }
}

fn dedup(columns: &mut Vec<String>) {
    let mut seen = HashSet::new();
    columns.retain(|c| seen.insert(c.clone()));
}
