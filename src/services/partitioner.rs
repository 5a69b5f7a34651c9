//! 分卷 - 业务能力层
//!
//! 把章节按卷分组、按用户选择过滤。分组和过滤都会重新从 0 编号，
//! 使每个批次的进度文件彼此独立。

use std::collections::{BTreeMap, BTreeSet};

use crate::models::UnitRef;

/// 原始选择键中表示"只取前 N 章"的保留值
pub const FIRST_N_SENTINEL: i64 = -1;

/// 用户选择要获取的章节
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// 全部章节
    All,
    /// 指定的卷
    Volumes(BTreeSet<u32>),
    /// 前 N 章（用于测试）
    FirstN(usize),
}

impl Selection {
    /// 从原始键解析：`[-1, N]` 表示前 N 章，其余为卷号列表
    pub fn from_keys(keys: &[i64]) -> Option<Self> {
        match keys {
            [] => None,
            [FIRST_N_SENTINEL, n] if *n > 0 => Some(Selection::FirstN(*n as usize)),
            [FIRST_N_SENTINEL, ..] => None,
            volumes => {
                let set: Option<BTreeSet<u32>> = volumes.iter().map(|v| u32::try_from(*v).ok()).collect();
                set.map(Selection::Volumes)
            }
        }
    }

    /// 输出文件名的后缀
    pub fn file_suffix(&self) -> String {
        match self {
            Selection::All => String::new(),
            Selection::FirstN(n) => format!("_first_{}", n),
            Selection::Volumes(volumes) => {
                let list: Vec<String> = volumes.iter().map(u32::to_string).collect();
                match list.as_slice() {
                    [] => String::new(),
                    [single] => format!("_vol_{}", single),
                    few if few.len() <= 3 => format!("_vols_{}", few.join("_")),
                    many => format!("_vols_{}-{}", many[0], many[many.len() - 1]),
                }
            }
        }
    }
}

/// 章节所属卷号，无法识别的归入第 0 卷
pub fn volume_of(unit: &UnitRef) -> u32 {
    unit.key().volume
}

/// 按卷分组，每组按章节号排序并从 0 重新编号
pub fn partition(units: &[UnitRef]) -> BTreeMap<u32, Vec<UnitRef>> {
    let mut groups: BTreeMap<u32, Vec<UnitRef>> = BTreeMap::new();
    for unit in units {
        groups.entry(volume_of(unit)).or_default().push(unit.clone());
    }

    for members in groups.values_mut() {
        members.sort_by(|a, b| a.key().number.total_cmp(&b.key().number).then(a.id.cmp(&b.id)));
        renumber(members);
    }
    groups
}

/// 按选择过滤章节，结果保持原顺序并从 0 重新编号
pub fn filter_by_selection(units: &[UnitRef], selection: &Selection) -> Vec<UnitRef> {
    let mut selected: Vec<UnitRef> = match selection {
        Selection::All => units.to_vec(),
        Selection::FirstN(n) => units.iter().take(*n).cloned().collect(),
        Selection::Volumes(volumes) => units
            .iter()
            .filter(|u| volumes.contains(&volume_of(u)))
            .cloned()
            .collect(),
    };
    renumber(&mut selected);
    selected
}

/// 每卷章节数，用于展示
pub fn volume_summary(units: &[UnitRef]) -> BTreeMap<u32, usize> {
    let mut summary = BTreeMap::new();
    for unit in units {
        *summary.entry(volume_of(unit)).or_insert(0) += 1;
    }
    summary
}

fn renumber(units: &mut [UnitRef]) {
    for (id, unit) in units.iter_mut().enumerate() {
        unit.id = id;
    }
}
