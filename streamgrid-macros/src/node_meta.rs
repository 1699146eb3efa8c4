use darling::FromAttributes;
use syn::{DeriveInput, Fields};

/// Parsed attributes from #[node_meta(...)]
#[derive(Debug, FromAttributes)]
#[darling(attributes(node_meta))]
pub struct NodeMetaArgs {
    pub kind: String,
}

pub fn parse_node_info(input: &DeriveInput) -> darling::Result<NodeMetaArgs> {
    NodeMetaArgs::from_attributes(&input.attrs)
}

/// Collect fields tagged #[input] / #[output], in declaration order.
pub fn parse_endpoints(input: &DeriveInput) -> syn::Result<(Vec<syn::Ident>, Vec<syn::Ident>)> {
    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "NodeEndpoints requires a struct with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "NodeEndpoints can only be derived for structs",
            ))
        }
    };

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for field in fields.iter() {
        let Some(ident) = field.ident.clone() else {
            continue;
        };

        if field.attrs.iter().any(|attr| attr.path().is_ident("input")) {
            inputs.push(ident.clone());
        }

        if field.attrs.iter().any(|attr| attr.path().is_ident("output")) {
            outputs.push(ident);
        }
    }

    Ok((inputs, outputs))
}
