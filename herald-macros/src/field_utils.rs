use syn::{Field, FieldsNamed, Token, punctuated::Punctuated};

fn field_is(field: &Field, name: &str) -> bool {
    field.ident.as_ref().map(|i| i == name).unwrap_or(false)
}

/// 确保具名字段结构体包含所需字段，并按给定顺序置于最前
/// - 已存在的同名字段沿用用户定义（含其属性）
/// - 其余字段保持原始相对顺序
pub(crate) fn ensure_required_fields(fields_named: &mut FieldsNamed, required: Vec<Field>) {
    let old_named = fields_named.named.clone();
    let mut new_named: Punctuated<Field, Token![,]> = Punctuated::new();

    let required_names: Vec<String> = required
        .iter()
        .filter_map(|f| f.ident.as_ref().map(|i| i.to_string()))
        .collect();

    for field in required {
        let name = field.ident.as_ref().map(|i| i.to_string()).unwrap_or_default();
        match old_named.iter().find(|f| field_is(f, &name)) {
            Some(existing) => new_named.push(existing.clone()),
            None => new_named.push(field),
        }
    }

    for f in old_named.into_iter() {
        let is_required = required_names.iter().any(|n| field_is(&f, n));
        if !is_required {
            new_named.push(f);
        }
    }

    fields_named.named = new_named;
}
