//! 星型树预聚合索引
//!
//! ```text
//! StarTreeBuilder ──build──▶ BuiltStarTree (TreeNode + 记录)
//!        │                         │ serialize_tree / write_star_tree_index
//!        ▼                         ▼
//!   function_pair            star_tree_index + star_tree_index_map
//!                                  │ StarTreeIndexContainer::load
//!                                  ▼
//!                 StarTree { PackedStarTree, DataSource × (维度 + pair) }
//!                                  │
//!                                  ▼
//!                        StarTreeFilterOperator ──▶ RoaringBitmap
//! ```

pub mod node;
pub mod tree;
pub mod builder;
pub mod function_pair;
pub mod index_map;
pub mod store;
pub mod filter;

pub use builder::{BuiltStarTree, StarTreeBuilder, StarTreeRecord};
pub use filter::StarTreeFilterOperator;
pub use function_pair::AggregationFunctionColumnPair;
pub use node::{TreeNode, ALL, STAR};
pub use store::{StarTree, StarTreeIndexContainer, StarTreeIndexEntry, write_star_tree_index};
pub use tree::{PackedStarTree, StarTreeNodeRef};
