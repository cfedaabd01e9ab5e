//! Work-order templates (pure domain logic, no IO).
//!
//! A stored [`WorkOrderTemplate`] is expanded into a concrete
//! [`WorkOrderInstance`] whose line items and materials can then be edited
//! optimistically through `tradeflow-optimistic`.

pub mod quantity;
pub mod template;

pub use quantity::{line_total, Quantity};
pub use template::{
    expand, LineItem, LineItemPatch, MaterialLine, MaterialPatch, TemplateLineItem, TemplateMaterial,
    WorkOrderInstance, WorkOrderTemplate,
};
