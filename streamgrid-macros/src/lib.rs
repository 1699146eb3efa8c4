use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

mod node_meta;
use node_meta::{parse_endpoints, parse_node_info};

/// Derives `NodeEndpoints` for a node descriptor.
///
/// `#[node_meta(kind = "...")]` names the wire discriminator; fields tagged
/// `#[input]` or `#[output]` contribute their stream ids in declaration order.
#[proc_macro_derive(NodeEndpoints, attributes(node_meta, input, output))]
pub fn derive_node_endpoints(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let node_info = match parse_node_info(&input) {
        Ok(info) => info,
        Err(e) => return e.write_errors().into(),
    };

    let (inputs, outputs) = match parse_endpoints(&input) {
        Ok(ports) => ports,
        Err(e) => return e.to_compile_error().into(),
    };

    let struct_name = &input.ident;
    let kind = &node_info.kind;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics crate::node::NodeEndpoints for #struct_name #ty_generics #where_clause {
            const KIND: &'static str = #kind;

            fn inputs(&self) -> Vec<crate::stream_id::StreamId> {
                let mut ids = Vec::new();
                #( crate::node::StreamIdSet::collect_ids(&self.#inputs, &mut ids); )*
                ids
            }

            fn outputs(&self) -> Vec<crate::stream_id::StreamId> {
                let mut ids = Vec::new();
                #( crate::node::StreamIdSet::collect_ids(&self.#outputs, &mut ids); )*
                ids
            }
        }
    };

    TokenStream::from(expanded)
}
