//! Fragment id catalogue of the system procedures.
//!
//! Every fragment publishes its table under the dependency id with the same
//! number, so a consumer names its input by the producing fragment.

use sysproc_common::{DependencyId, FragmentId};

pub const TABLE_DATA: FragmentId = FragmentId(10);
pub const TABLE_AGGREGATOR: FragmentId = FragmentId(11);
pub const PARTITION_COUNT: FragmentId = FragmentId(12);
pub const ROW_COUNT_AGGREGATOR: FragmentId = FragmentId(13);

pub const SAVE_TEST: FragmentId = FragmentId(20);
pub const SAVE_TEST_RESULTS: FragmentId = FragmentId(21);

pub const NIBBLE_DELETE_CHUNK: FragmentId = FragmentId(30);
pub const NIBBLE_DELETE_AGGREGATOR: FragmentId = FragmentId(31);
pub const MIGRATE_CHUNK: FragmentId = FragmentId(32);
pub const MIGRATE_AGGREGATOR: FragmentId = FragmentId(33);

pub const SET_RUN_MODE: FragmentId = FragmentId(40);
pub const SET_RUN_MODE_RESULTS: FragmentId = FragmentId(41);
pub const INSTALL_SETTINGS: FragmentId = FragmentId(42);
pub const INSTALL_SETTINGS_RESULTS: FragmentId = FragmentId(43);

pub const TABLE_CHECK: FragmentId = FragmentId(50);
pub const TABLE_CHECK_RESULTS: FragmentId = FragmentId(51);

pub const UPDATE_CATALOG_PRECHECK: FragmentId = FragmentId(60);
pub const UPDATE_CATALOG_PRECHECK_RESULTS: FragmentId = FragmentId(61);
pub const UPDATE_CATALOG: FragmentId = FragmentId(62);
pub const UPDATE_CATALOG_RESULTS: FragmentId = FragmentId(63);

/// Output dependency id of `fragment`.
pub const fn dep(fragment: FragmentId) -> DependencyId {
    DependencyId(fragment.0 as u32)
}

/// Every fragment id above, in ascending order.
pub const ALL: [FragmentId; 20] = [
    TABLE_DATA,
    TABLE_AGGREGATOR,
    PARTITION_COUNT,
    ROW_COUNT_AGGREGATOR,
    SAVE_TEST,
    SAVE_TEST_RESULTS,
    NIBBLE_DELETE_CHUNK,
    NIBBLE_DELETE_AGGREGATOR,
    MIGRATE_CHUNK,
    MIGRATE_AGGREGATOR,
    SET_RUN_MODE,
    SET_RUN_MODE_RESULTS,
    INSTALL_SETTINGS,
    INSTALL_SETTINGS_RESULTS,
    TABLE_CHECK,
    TABLE_CHECK_RESULTS,
    UPDATE_CATALOG_PRECHECK,
    UPDATE_CATALOG_PRECHECK_RESULTS,
    UPDATE_CATALOG,
    UPDATE_CATALOG_RESULTS,
];
