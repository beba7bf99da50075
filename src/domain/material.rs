// ==========================================
// 物料批次追溯引擎 - 物料主数据模型
// ==========================================
// 来源: 外部库存主数据模块
// 红线: 本引擎只读，不修改库存与安全库存
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// Material - 物料主数据
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub material_id: String,         // 物料ID
    pub code: String,                // 物料编码
    pub name: String,                // 物料名称
    pub unit: String,                // 计量单位
    pub category_id: Option<String>, // 物料分类（规则匹配用）
    pub current_stock: f64,          // 当前库存
    pub safety_stock: Option<f64>,   // 安全库存（None = 按规则推算）
    pub standard_price: f64,         // 标准单价
}

impl Material {
    /// 创建物料主数据（测试/同步入口使用）
    pub fn new(material_id: &str, code: &str, name: &str, unit: &str) -> Self {
        Self {
            material_id: material_id.to_string(),
            code: code.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
            category_id: None,
            current_stock: 0.0,
            safety_stock: None,
            standard_price: 0.0,
        }
    }

    /// 安全库存是否显式设置
    pub fn has_explicit_safety_stock(&self) -> bool {
        matches!(self.safety_stock, Some(v) if v > 0.0)
    }
}
