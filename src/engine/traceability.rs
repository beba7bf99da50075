// ==========================================
// 物料批次追溯引擎 - 追溯索引
// ==========================================
// 职责: 批次 -> 消耗 -> 项目/工单 的正向与反向追溯
// 说明: 只读；消耗台账只追加，无需缓存失效
// 说明: 项目/工单名称按单次调用缓存，不跨调用共享
// ==========================================

use crate::domain::batch::MaterialBatch;
use crate::domain::consumption::MaterialConsumption;
use crate::domain::trace::{BackwardTrace, BatchGenealogy, GenealogySummary, TraceEntry, TraceTarget};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::registry::MasterDataProvider;
use crate::repository::error::RepositoryResult;
use crate::repository::{BatchRepository, ConsumptionRepository};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

// ==========================================
// LabelCache - 单次调用内的名称缓存
// ==========================================
pub(crate) struct LabelCache<'a> {
    master_data: &'a dyn MasterDataProvider,
    projects: HashMap<String, Option<String>>,
    work_orders: HashMap<String, Option<String>>,
}

impl<'a> LabelCache<'a> {
    pub(crate) fn new(master_data: &'a dyn MasterDataProvider) -> Self {
        Self {
            master_data,
            projects: HashMap::new(),
            work_orders: HashMap::new(),
        }
    }

    fn project(&mut self, project_id: &str) -> RepositoryResult<Option<String>> {
        if let Some(hit) = self.projects.get(project_id) {
            return Ok(hit.clone());
        }
        let label = self.master_data.get_project_label(project_id)?;
        self.projects.insert(project_id.to_string(), label.clone());
        Ok(label)
    }

    fn work_order(&mut self, work_order_id: &str) -> RepositoryResult<Option<String>> {
        if let Some(hit) = self.work_orders.get(work_order_id) {
            return Ok(hit.clone());
        }
        let label = self.master_data.get_work_order_label(work_order_id)?;
        self.work_orders.insert(work_order_id.to_string(), label.clone());
        Ok(label)
    }

    pub(crate) fn enrich(&mut self, consumption: MaterialConsumption) -> RepositoryResult<TraceEntry> {
        let project_label = match consumption.project_id.as_deref() {
            Some(id) => self.project(id)?,
            None => None,
        };
        let work_order_label = match consumption.work_order_id.as_deref() {
            Some(id) => self.work_order(id)?,
            None => None,
        };
        Ok(TraceEntry {
            consumption,
            project_label,
            work_order_label,
        })
    }

    pub(crate) fn enrich_all(&mut self, records: Vec<MaterialConsumption>) -> RepositoryResult<Vec<TraceEntry>> {
        records.into_iter().map(|c| self.enrich(c)).collect()
    }

    #[cfg(test)]
    fn cached(&self) -> (usize, usize) {
        (self.projects.len(), self.work_orders.len())
    }
}

// ==========================================
// TraceabilityIndex - 追溯查询
// ==========================================
pub struct TraceabilityIndex {
    batch_repo: Arc<BatchRepository>,
    consumption_repo: Arc<ConsumptionRepository>,
    master_data: Arc<dyn MasterDataProvider>,
}

impl TraceabilityIndex {
    pub fn new(
        batch_repo: Arc<BatchRepository>,
        consumption_repo: Arc<ConsumptionRepository>,
        master_data: Arc<dyn MasterDataProvider>,
    ) -> Self {
        Self {
            batch_repo,
            consumption_repo,
            master_data,
        }
    }

    /// 正向追溯: 批次的全部消耗（时间正序）
    pub fn trace_forward(&self, batch_id: &str) -> EngineResult<Vec<TraceEntry>> {
        if self.batch_repo.find_by_id(batch_id)?.is_none() {
            return Err(EngineError::not_found("MaterialBatch", batch_id));
        }
        self.trail_of(batch_id)
    }

    fn trail_of(&self, batch_id: &str) -> EngineResult<Vec<TraceEntry>> {
        let records = self.consumption_repo.list_by_batch(batch_id)?;
        let mut labels = LabelCache::new(self.master_data.as_ref());
        Ok(labels.enrich_all(records)?)
    }

    /// 反向追溯: 项目/工单的全部消耗 + 所耗批次ID（去重排序）
    pub fn trace_backward(&self, target: TraceTarget) -> EngineResult<BackwardTrace> {
        let records = match &target {
            TraceTarget::Project(id) => self.consumption_repo.list_by_project(id)?,
            TraceTarget::WorkOrder(id) => self.consumption_repo.list_by_work_order(id)?,
        };
        let batch_ids: Vec<String> = records
            .iter()
            .filter_map(|c| c.batch_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut labels = LabelCache::new(self.master_data.as_ref());
        let entries = labels.enrich_all(records)?;

        Ok(BackwardTrace {
            target,
            entries,
            batch_ids,
        })
    }

    /// 反向追溯到批次主数据
    pub fn consumed_batches(&self, target: TraceTarget) -> EngineResult<Vec<MaterialBatch>> {
        let trace = self.trace_backward(target)?;
        Ok(self.batch_repo.list_by_ids(&trace.batch_ids)?)
    }

    /// 按批次号或条码取完整谱系
    pub fn trace_by_key(&self, key: &str) -> EngineResult<BatchGenealogy> {
        let batch = self
            .batch_repo
            .find_by_key(key)?
            .ok_or_else(|| EngineError::not_found("MaterialBatch", key))?;
        let trail = self.trail_of(&batch.batch_id)?;
        let material = self.master_data.get_material(&batch.material_id)?;

        let projects: BTreeSet<&str> = trail
            .iter()
            .filter_map(|e| e.consumption.project_id.as_deref())
            .collect();
        let work_orders: BTreeSet<&str> = trail
            .iter()
            .filter_map(|e| e.consumption.work_order_id.as_deref())
            .collect();

        let summary = GenealogySummary {
            material_code: material.as_ref().map(|m| m.code.clone()),
            material_name: material.as_ref().map(|m| m.name.clone()),
            record_count: trail.len(),
            total_consumed: trail.iter().map(|e| e.consumption.consumption_qty).sum(),
            distinct_projects: projects.len(),
            distinct_work_orders: work_orders.len(),
            first_consumed_at: trail.iter().map(|e| e.consumption.consumed_at).min(),
            last_consumed_at: trail.iter().map(|e| e.consumption.consumed_at).max(),
        };

        Ok(BatchGenealogy {
            batch,
            trail,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::material::Material;
    use crate::domain::types::ConsumptionType;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 计数型主数据桩
    struct CountingProvider {
        lookups: AtomicUsize,
    }

    impl MasterDataProvider for CountingProvider {
        fn get_material(&self, _material_id: &str) -> RepositoryResult<Option<Material>> {
            Ok(None)
        }

        fn get_project_label(&self, project_id: &str) -> RepositoryResult<Option<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("项目-{}", project_id)))
        }

        fn get_work_order_label(&self, _work_order_id: &str) -> RepositoryResult<Option<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn record(no: &str, project: Option<&str>, work_order: Option<&str>) -> MaterialConsumption {
        let at = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        MaterialConsumption {
            consumption_id: no.to_string(),
            consumption_no: no.to_string(),
            material_id: "M1".to_string(),
            batch_id: None,
            consumption_qty: 1.0,
            standard_qty: None,
            variance_qty: None,
            variance_rate: None,
            is_waste: false,
            consumption_type: ConsumptionType::Production,
            project_id: project.map(str::to_string),
            work_order_id: work_order.map(str::to_string),
            unit_price: 1.0,
            total_cost: 1.0,
            consumed_at: at,
            operator: None,
            remark: None,
            created_at: at,
        }
    }

    #[test]
    fn test_label_cache_looks_up_once_per_id() {
        let provider = CountingProvider {
            lookups: AtomicUsize::new(0),
        };
        let mut cache = LabelCache::new(&provider);
        let entries = cache
            .enrich_all(vec![
                record("1", Some("P1"), Some("W1")),
                record("2", Some("P1"), Some("W1")),
                record("3", Some("P2"), None),
            ])
            .unwrap();

        assert_eq!(entries[0].project_label.as_deref(), Some("项目-P1"));
        assert_eq!(entries[2].project_label.as_deref(), Some("项目-P2"));
        assert!(entries[0].work_order_label.is_none());
        assert_eq!(cache.cached(), (2, 1));
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 3);
    }
}
