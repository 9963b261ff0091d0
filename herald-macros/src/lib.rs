use proc_macro::TokenStream;

mod derive_utils;
mod entity;
mod event;
mod field_utils;

/// 实体宏：为聚合结构体注入事件溯源所需的簿记字段并实现 `Entity`
///
/// - 注入字段（若缺失）并置于最前：`id: String`、`version: usize`、
///   `uncommitted_events: Vec<Event>`（`#[serde(skip)]`）、`deleted: bool`
/// - 自动实现 `::herald_domain::entity::Entity`
/// - 默认派生 `Debug`、`Default`、`serde::Serialize`、`serde::Deserialize`
/// - 支持参数：`#[entity(debug = false)]` 关闭 `Debug` 派生
#[proc_macro_attribute]
pub fn entity(attr: TokenStream, item: TokenStream) -> TokenStream {
    entity::expand(attr, item)
}

/// 事件载荷宏：为具名字段结构体实现 `EventPayload`
///
/// - 支持参数：`#[event(event_type = "user.registered", kind = "integration")]`
///   - `event_type` 默认为结构体名
///   - `kind` 取值 `domain`（默认）/ `integration` / `system`
/// - 默认派生 `Debug`、`Clone`、`serde::Serialize`、`serde::Deserialize`
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}
