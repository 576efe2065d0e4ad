use convert_case::{Case, Casing};
use syn::{Field, Ident, LitStr, Type};

pub(crate) struct MemberMetadata {
    pub(crate) ident: Ident,
    pub(crate) ty: Type,
    /// Rust name of the member, without the raw identifier prefix.
    pub(crate) name: String,
    pub(crate) column: String,
}

pub(crate) fn decode_member(field: &Field) -> MemberMetadata {
    let ident = field
        .ident
        .clone()
        .expect("Bean members are expected to have a name");
    let name = ident.to_string().trim_start_matches("r#").to_string();
    let mut column = name.to_case(Case::Snake);
    if column.starts_with('_') {
        column.remove(0);
    }
    for attr in &field.attrs {
        if attr.meta.path().is_ident("column_name") {
            let Ok(v) = attr
                .meta
                .require_list()
                .and_then(|v| v.parse_args::<LitStr>())
            else {
                panic!(
                    "Error while parsing `column_name`, use it like #[column_name(\"{column}\")]"
                );
            };
            column = v.value();
        }
    }
    MemberMetadata {
        ident,
        ty: field.ty.clone(),
        name,
        column,
    }
}
