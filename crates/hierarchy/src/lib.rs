//! 信使四级层级管理
//!
//! 楼栋(1) → 片区(2) → 学校(3) → 城市(4)。所有写操作在同一把异步锁内
//! 完成"读取、校验、写入"，保证单进程内层级不变量不被并发修改破坏。

pub mod manager;

pub use manager::HierarchyManager;
