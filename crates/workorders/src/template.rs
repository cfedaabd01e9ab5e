use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tradeflow_core::{DomainError, DomainResult, Entity, ItemId, TemplateId};
use tradeflow_optimistic::Record;

use crate::quantity::{line_total, Quantity};

/// Labour / service line of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateLineItem {
    pub description: String,
    pub quantity: Quantity,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: i64,
}

/// Material line of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMaterial {
    pub name: String,
    pub quantity: Quantity,
    /// Cost in smallest currency unit (e.g., cents).
    pub cost_per_unit: i64,
}

/// A stored, reusable work-order blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderTemplate {
    pub id: TemplateId,
    pub name: String,
    /// Values copied verbatim onto every work order (e.g. `priority`).
    #[serde(default)]
    pub default_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub line_items: Vec<TemplateLineItem>,
    #[serde(default)]
    pub materials: Vec<TemplateMaterial>,
}

/// A concrete line item on a work order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: ItemId,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineItemPatch {
    pub description: Option<String>,
    pub quantity: Option<Quantity>,
    pub unit_price: Option<i64>,
}

/// A concrete material line on a work order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialLine {
    pub id: ItemId,
    pub name: String,
    pub quantity: Quantity,
    pub cost_per_unit: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialPatch {
    pub name: Option<String>,
    pub quantity: Option<Quantity>,
    pub cost_per_unit: Option<i64>,
}

/// Result of expanding a template. The template itself is never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderInstance {
    pub template_id: TemplateId,
    pub name: String,
    pub fields: BTreeMap<String, String>,
    pub line_items: Vec<LineItem>,
    pub materials: Vec<MaterialLine>,
    pub labor_total: i64,
    pub materials_total: i64,
    pub total: i64,
}

/// Expand `template` into a work order with computed totals.
///
/// Deterministic: the same template always yields the same instance. Lines
/// get provisional ids (`temp-line-1`, `temp-material-1`, …) until they are
/// saved.
pub fn expand(template: &WorkOrderTemplate) -> DomainResult<WorkOrderInstance> {
    if template.name.trim().is_empty() {
        return Err(DomainError::validation("template name must not be empty"));
    }

    let line_items = template
        .line_items
        .iter()
        .enumerate()
        .map(|(i, line)| {
            LineItem::new(
                ItemId::provisional(format!("line-{}", i + 1)),
                line.description.clone(),
                line.quantity,
                line.unit_price,
            )
        })
        .collect::<DomainResult<Vec<_>>>()?;

    let materials = template
        .materials
        .iter()
        .enumerate()
        .map(|(i, m)| {
            MaterialLine::new(
                ItemId::provisional(format!("material-{}", i + 1)),
                m.name.clone(),
                m.quantity,
                m.cost_per_unit,
            )
        })
        .collect::<DomainResult<Vec<_>>>()?;

    let mut instance = WorkOrderInstance {
        template_id: template.id,
        name: template.name.clone(),
        fields: template.default_fields.clone(),
        line_items,
        materials,
        labor_total: 0,
        materials_total: 0,
        total: 0,
    };
    instance.recalculate()?;

    tracing::debug!(
        template_id = %template.id,
        line_items = instance.line_items.len(),
        materials = instance.materials.len(),
        total = instance.total,
        "template expanded"
    );
    Ok(instance)
}

impl WorkOrderInstance {
    /// Recompute the three totals from the current lines.
    pub fn recalculate(&mut self) -> DomainResult<()> {
        self.labor_total = checked_sum(self.line_items.iter().map(|l| l.total))?;
        self.materials_total = checked_sum(self.materials.iter().map(|m| m.total))?;
        self.total = self
            .labor_total
            .checked_add(self.materials_total)
            .ok_or_else(overflow)?;
        Ok(())
    }

    /// Replace the material lines (e.g. with the confirmed snapshot after
    /// an edit) and recompute totals.
    pub fn set_materials(&mut self, materials: Vec<MaterialLine>) -> DomainResult<()> {
        self.materials = materials;
        self.recalculate()
    }

    pub fn set_line_items(&mut self, line_items: Vec<LineItem>) -> DomainResult<()> {
        self.line_items = line_items;
        self.recalculate()
    }
}

impl LineItem {
    /// A validated line with its total computed.
    pub fn new(id: ItemId, description: impl Into<String>, quantity: Quantity, unit_price: i64) -> DomainResult<Self> {
        let line = Self {
            id,
            description: description.into(),
            quantity,
            unit_price,
            total: line_total(quantity, unit_price).ok_or_else(overflow)?,
        };
        line.validate()?;
        Ok(line)
    }
}

impl MaterialLine {
    /// A validated material with its total computed.
    pub fn new(id: ItemId, name: impl Into<String>, quantity: Quantity, cost_per_unit: i64) -> DomainResult<Self> {
        let line = Self {
            id,
            name: name.into(),
            quantity,
            cost_per_unit,
            total: line_total(quantity, cost_per_unit).ok_or_else(overflow)?,
        };
        line.validate()?;
        Ok(line)
    }
}

impl Entity for LineItem {
    type Id = ItemId;

    fn id(&self) -> &ItemId {
        &self.id
    }
}

impl Record for LineItem {
    type Patch = LineItemPatch;

    fn set_id(&mut self, id: ItemId) {
        self.id = id;
    }

    fn apply_patch(&mut self, patch: &LineItemPatch) {
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(quantity) = patch.quantity {
            self.quantity = quantity;
        }
        if let Some(unit_price) = patch.unit_price {
            self.unit_price = unit_price;
        }
        // Out-of-range totals are caught by `validate`.
        self.total = line_total(self.quantity, self.unit_price).unwrap_or(i64::MAX);
    }

    fn validate(&self) -> DomainResult<()> {
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("line description must not be empty"));
        }
        check_amounts(self.quantity, self.unit_price)
    }
}

impl Entity for MaterialLine {
    type Id = ItemId;

    fn id(&self) -> &ItemId {
        &self.id
    }
}

impl Record for MaterialLine {
    type Patch = MaterialPatch;

    fn set_id(&mut self, id: ItemId) {
        self.id = id;
    }

    fn apply_patch(&mut self, patch: &MaterialPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(quantity) = patch.quantity {
            self.quantity = quantity;
        }
        if let Some(cost) = patch.cost_per_unit {
            self.cost_per_unit = cost;
        }
        self.total = line_total(self.quantity, self.cost_per_unit).unwrap_or(i64::MAX);
    }

    fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("material name must not be empty"));
        }
        check_amounts(self.quantity, self.cost_per_unit)
    }
}

fn check_amounts(quantity: Quantity, price: i64) -> DomainResult<()> {
    if quantity.is_negative() {
        return Err(DomainError::validation(format!("quantity {quantity} must not be negative")));
    }
    if price < 0 {
        return Err(DomainError::validation(format!("price {price} must not be negative")));
    }
    line_total(quantity, price).map(|_| ()).ok_or_else(overflow)
}

fn checked_sum(mut values: impl Iterator<Item = i64>) -> DomainResult<i64> {
    values
        .try_fold(0i64, |acc, v| acc.checked_add(v))
        .ok_or_else(overflow)
}

fn overflow() -> DomainError {
    DomainError::validation("amount exceeds the representable range")
}
