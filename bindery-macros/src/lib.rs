mod decode_member;

use decode_member::{MemberMetadata, decode_member};
use proc_macro::TokenStream;
use quote::quote;
use syn::{Fields, ItemStruct, parse_macro_input};

/// Implements `bindery::Bean` for a struct with named fields.
///
/// Each field is a member mapped to the column of the same name in snake
/// case, `#[column_name("...")]` picks another column. Field types must
/// implement `bindery::AsValue` and `Clone`.
#[proc_macro_derive(Bean, attributes(column_name))]
pub fn derive_bean(input: TokenStream) -> TokenStream {
    let item: ItemStruct = parse_macro_input!(input as ItemStruct);
    let name = &item.ident;
    let (impl_generics, ty_generics, where_clause) = item.generics.split_for_impl();
    let Fields::Named(..) = &item.fields else {
        panic!("Bean can only be derived for structs with named fields");
    };
    let members: Vec<MemberMetadata> = item.fields.iter().map(decode_member).collect();
    let names = members.iter().map(|v| &v.name);
    let columns = members.iter().map(|v| {
        let (name, column) = (&v.name, &v.column);
        quote! { #name => ::std::option::Option::Some(#column) }
    });
    let reads = members.iter().map(|v| {
        let (name, ident) = (&v.name, &v.ident);
        quote! {
            #name => ::std::result::Result::Ok(
                ::bindery::AsValue::as_value(::std::clone::Clone::clone(&self.#ident))
            )
        }
    });
    let writes = members.iter().map(|v| {
        let (name, ident, ty) = (&v.name, &v.ident, &v.ty);
        quote! {
            #name => {
                self.#ident = <#ty as ::bindery::AsValue>::try_from_value(value)?;
                ::std::result::Result::Ok(())
            }
        }
    });
    let struct_name = name.to_string();
    quote! {
        impl #impl_generics ::bindery::Bean for #name #ty_generics #where_clause {
            fn members() -> &'static [&'static str] {
                &[#(#names),*]
            }
            fn column_name(member: &str) -> ::std::option::Option<&'static str> {
                match member {
                    #(#columns,)*
                    _ => ::std::option::Option::None,
                }
            }
            fn read_member(&self, member: &str) -> ::bindery::anyhow::Result<::bindery::Value> {
                match member {
                    #(#reads,)*
                    _ => ::std::result::Result::Err(::bindery::anyhow::Error::msg(
                        ::std::format!("{} has no member `{}`", #struct_name, member),
                    )),
                }
            }
            fn write_member(
                &mut self,
                member: &str,
                value: ::bindery::Value,
            ) -> ::bindery::anyhow::Result<()> {
                match member {
                    #(#writes,)*
                    _ => ::std::result::Result::Err(::bindery::anyhow::Error::msg(
                        ::std::format!("{} has no member `{}`", #struct_name, member),
                    )),
                }
            }
        }
    }
    .into()
}
