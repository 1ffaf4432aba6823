mod goals;
mod helpers;
mod import;
mod log;
mod prefs;
mod summary;
mod sync;
mod template;
mod water;
mod weight;

pub(crate) use goals::{cmd_goals_set, cmd_goals_show};
pub(crate) use import::{cmd_export, cmd_import};
pub(crate) use log::{MealArgs, cmd_clear, cmd_log, cmd_remove};
pub(crate) use prefs::{cmd_diet_set, cmd_diet_show, cmd_favorite_list, cmd_favorite_toggle};
pub(crate) use summary::{cmd_history, cmd_streak, cmd_summary};
pub(crate) use sync::{
    cmd_sync_create, cmd_sync_join, cmd_sync_pull, cmd_sync_push, cmd_sync_status,
    cmd_sync_unpair,
};
pub(crate) use template::{
    cmd_template_apply, cmd_template_delete, cmd_template_list, cmd_template_save,
};
pub(crate) use water::{cmd_water_add, cmd_water_set, cmd_water_show};
pub(crate) use weight::{cmd_weight_clear, cmd_weight_history, cmd_weight_log};
