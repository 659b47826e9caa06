use std::collections::HashMap;
use std::sync::LazyLock;

use strata_error::{DbError, Result};

use crate::scalar::ScalarValue;

pub const DEFAULT_CELL_CACHE_CAPACITY: u64 = 65536;

/// Configuration for a query session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub ignore_identifier_case: bool,
    pub enable_cell_cache: bool,
    pub cell_cache_capacity: u64,
    pub cache_uncorrelated_subqueries: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ignore_identifier_case: true,
            enable_cell_cache: true,
            cell_cache_capacity: DEFAULT_CELL_CACHE_CAPACITY,
            cache_uncorrelated_subqueries: true,
        }
    }
}

impl SessionConfig {
    pub fn set_from_scalar(&mut self, name: &str, value: &ScalarValue) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        let scalar = (func.get)(&def_conf);
        (func.set)(&scalar, self)
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Names and descriptions of every setting, sorted by name.
    pub fn describe_settings() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, funcs)| (*name, funcs.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(scalar: &ScalarValue, conf: &mut SessionConfig) -> Result<()>,
    get: fn(conf: &SessionConfig) -> ScalarValue,
}

impl SettingFunctions {
    const fn new<S: SessionSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

fn insert_setting<S: SessionSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<IgnoreIdentifierCase>(&mut map);
    insert_setting::<EnableCellCache>(&mut map);
    insert_setting::<CellCacheCapacity>(&mut map);
    insert_setting::<CacheUncorrelatedSubqueries>(&mut map);

    map
});

pub trait SessionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: &ScalarValue, conf: &mut SessionConfig) -> Result<()>;
    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue;
}

fn expect_bool(name: &str, scalar: &ScalarValue) -> Result<bool> {
    scalar
        .try_as_bool()?
        .ok_or_else(|| DbError::new(format!("Setting '{name}' cannot be NULL")))
}

pub struct IgnoreIdentifierCase;

impl SessionSetting for IgnoreIdentifierCase {
    const NAME: &'static str = "ignore_identifier_case";
    const DESCRIPTION: &'static str = "Compare table and column names case-insensitively";

    fn set_from_scalar(scalar: &ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.ignore_identifier_case = expect_bool(Self::NAME, scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.ignore_identifier_case.into()
    }
}

pub struct EnableCellCache;

impl SessionSetting for EnableCellCache {
    const NAME: &'static str = "enable_cell_cache";
    const DESCRIPTION: &'static str = "Cache computed function table cells across tables";

    fn set_from_scalar(scalar: &ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.enable_cell_cache = expect_bool(Self::NAME, scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.enable_cell_cache.into()
    }
}

const MAX_CELL_CACHE_CAPACITY: i64 = 1 << 24;

pub struct CellCacheCapacity;

impl SessionSetting for CellCacheCapacity {
    const NAME: &'static str = "cell_cache_capacity";
    const DESCRIPTION: &'static str = "Number of cells held by the cell cache before it's cleared";

    fn set_from_scalar(scalar: &ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let val = scalar
            .try_as_i64()?
            .ok_or_else(|| DbError::new(format!("Setting '{}' cannot be NULL", Self::NAME)))?;
        if !(0..=MAX_CELL_CACHE_CAPACITY).contains(&val) {
            return Err(DbError::new(format!(
                "Cell cache capacity must be between 0 and {MAX_CELL_CACHE_CAPACITY}"
            )));
        }
        conf.cell_cache_capacity = val as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        ScalarValue::Int64(conf.cell_cache_capacity as i64)
    }
}

pub struct CacheUncorrelatedSubqueries;

impl SessionSetting for CacheUncorrelatedSubqueries {
    const NAME: &'static str = "cache_uncorrelated_subqueries";
    const DESCRIPTION: &'static str = "Evaluate sub-queries without outer references once per query";

    fn set_from_scalar(scalar: &ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.cache_uncorrelated_subqueries = expect_bool(Self::NAME, scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.cache_uncorrelated_subqueries.into()
    }
}
