// ==========================================
// 物料批次追溯引擎 - 物料主数据仓储
// ==========================================
// 数据归属: 外部库存主数据模块
// 红线: 引擎只读；写入方法仅供主数据同步入口使用
// ==========================================

use crate::domain::material::Material;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// MaterialRepository - 物料/项目/工单主数据仓储
// ==========================================
pub struct MaterialRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MaterialRepository {
    /// 从已有连接创建仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按物料ID查询主数据
    pub fn find_by_id(&self, material_id: &str) -> RepositoryResult<Option<Material>> {
        let conn = self.get_conn()?;
        let material = conn
            .query_row(
                r#"
                SELECT material_id, code, name, unit, category_id,
                       current_stock, safety_stock, standard_price
                FROM material
                WHERE material_id = ?1
                "#,
                params![material_id],
                |row| {
                    Ok(Material {
                        material_id: row.get(0)?,
                        code: row.get(1)?,
                        name: row.get(2)?,
                        unit: row.get(3)?,
                        category_id: row.get(4)?,
                        current_stock: row.get(5)?,
                        safety_stock: row.get(6)?,
                        standard_price: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(material)
    }

    /// 全部物料ID（维护任务遍历用）
    pub fn list_material_ids(&self) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT material_id FROM material ORDER BY material_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// 批量同步物料主数据（upsert）
    ///
    /// # 说明
    /// - 仅供外部主数据同步使用，引擎内部不调用
    /// - 使用事务确保原子性
    pub fn upsert_materials(&self, materials: &[Material]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        for m in materials {
            tx.execute(
                r#"
                INSERT INTO material (
                    material_id, code, name, unit, category_id,
                    current_stock, safety_stock, standard_price, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
                ON CONFLICT(material_id) DO UPDATE SET
                    code = excluded.code,
                    name = excluded.name,
                    unit = excluded.unit,
                    category_id = excluded.category_id,
                    current_stock = excluded.current_stock,
                    safety_stock = excluded.safety_stock,
                    standard_price = excluded.standard_price,
                    updated_at = excluded.updated_at
                "#,
                params![
                    m.material_id,
                    m.code,
                    m.name,
                    m.unit,
                    m.category_id,
                    m.current_stock,
                    m.safety_stock,
                    m.standard_price,
                ],
            )?;
            count += 1;
        }

        tx.commit()?;
        Ok(count)
    }

    /// 同步项目名称
    pub fn upsert_project(&self, project_id: &str, project_name: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO project (project_id, project_name) VALUES (?1, ?2)
            ON CONFLICT(project_id) DO UPDATE SET project_name = excluded.project_name
            "#,
            params![project_id, project_name],
        )?;
        Ok(())
    }

    /// 同步工单
    pub fn upsert_work_order(
        &self,
        work_order_id: &str,
        work_order_no: &str,
        project_id: Option<&str>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO work_order (work_order_id, work_order_no, project_id) VALUES (?1, ?2, ?3)
            ON CONFLICT(work_order_id) DO UPDATE SET
                work_order_no = excluded.work_order_no,
                project_id = excluded.project_id
            "#,
            params![work_order_id, work_order_no, project_id],
        )?;
        Ok(())
    }

    /// 项目名称
    pub fn project_label(&self, project_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let label = conn
            .query_row(
                "SELECT project_name FROM project WHERE project_id = ?1",
                params![project_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(label)
    }

    /// 工单号
    pub fn work_order_label(&self, work_order_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let label = conn
            .query_row(
                "SELECT work_order_no FROM work_order WHERE work_order_id = ?1",
                params![work_order_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(label)
    }
}
