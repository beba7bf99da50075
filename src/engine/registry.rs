// ==========================================
// 物料批次追溯引擎 - 主数据查询接口
// ==========================================
// 职责: 引擎对外部主数据（物料/项目/工单）的只读依赖
// 说明: Engine 层定义 trait，仓储层提供 SQLite 实现；测试可替换
// ==========================================

use crate::domain::material::Material;
use crate::repository::error::RepositoryResult;
use crate::repository::MaterialRepository;

/// 主数据提供者
pub trait MasterDataProvider: Send + Sync {
    fn get_material(&self, material_id: &str) -> RepositoryResult<Option<Material>>;

    fn get_project_label(&self, project_id: &str) -> RepositoryResult<Option<String>>;

    fn get_work_order_label(&self, work_order_id: &str) -> RepositoryResult<Option<String>>;
}

impl MasterDataProvider for MaterialRepository {
    fn get_material(&self, material_id: &str) -> RepositoryResult<Option<Material>> {
        self.find_by_id(material_id)
    }

    fn get_project_label(&self, project_id: &str) -> RepositoryResult<Option<String>> {
        self.project_label(project_id)
    }

    fn get_work_order_label(&self, work_order_id: &str) -> RepositoryResult<Option<String>> {
        self.work_order_label(work_order_id)
    }
}
