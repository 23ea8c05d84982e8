//! Proc macros for storyteller function tools.
//!
//! Provides `#[derive(Tool)]`, which turns an arguments struct into a
//! function tool definition for the assistants service: a tool name, a
//! description taken from the doc comment, and a JSON schema built from the
//! struct fields.
//!
//! # Example
//!
//! ```ignore
//! /// Fetch the bio of a story entity.
//! #[derive(Tool, Deserialize)]
//! #[tool(name = "get_entity_bio")]
//! struct GetEntityBio {
//!     /// Name of the entity.
//!     name: String,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, DeriveInput, Field, Lit, Meta, Type};

/// Derive macro for function tool definitions.
///
/// # Attributes
///
/// - `#[tool(name = "...")]` - Override the tool name (defaults to snake_case struct name)
/// - `#[tool(optional)]` on fields - Leave the field out of `required`
/// - `#[tool(rename = "...")]` on fields - Override the property name in the schema
#[proc_macro_derive(Tool, attributes(tool))]
pub fn derive_tool(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_tool(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_tool(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let tool_name = tool_name_value(&input.attrs, "name")
        .unwrap_or_else(|| to_snake_case(&struct_name.to_string()));
    let description = doc_comment(&input.attrs);

    let fields: Vec<&Field> = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => named.named.iter().collect(),
            syn::Fields::Unit => Vec::new(),
            syn::Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Tool derive only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Tool derive only supports structs",
            ))
        }
    };

    let mut properties = Vec::new();
    let mut required = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let property_name =
            tool_name_value(&field.attrs, "rename").unwrap_or_else(|| ident.to_string());
        let schema = type_schema(&field.ty);
        let field_desc = doc_comment(&field.attrs);

        let describe = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::json!(#field_desc); }
        };

        properties.push(quote! {
            {
                let mut property = #schema;
                #describe
                properties.insert(#property_name.to_string(), property);
            }
        });

        if !has_flag(&field.attrs, "optional") && !is_option(&field.ty) {
            required.push(property_name);
        }
    }

    Ok(quote! {
        impl #struct_name {
            /// The function name the assistant calls.
            pub fn tool_name() -> &'static str {
                #tool_name
            }

            /// The description shown to the assistant.
            pub fn tool_description() -> &'static str {
                #description
            }

            /// JSON schema for the function arguments.
            pub fn input_schema() -> serde_json::Value {
                #[allow(unused_mut)]
                let mut properties = serde_json::Map::new();
                #(#properties)*

                let required: Vec<&str> = vec![#(#required),*];

                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required
                })
            }

            /// Function tool definition for the assistants service.
            pub fn as_tool() -> assistants::ToolDefinition {
                assistants::ToolDefinition::function(
                    Self::tool_name(),
                    Self::tool_description(),
                    Self::input_schema(),
                )
            }
        }
    })
}

/// Read `#[tool(key = "value")]`.
fn tool_name_value(attrs: &[Attribute], key: &str) -> Option<String> {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("tool"))
        .filter_map(|attr| attr.parse_args::<Meta>().ok())
        .find_map(|meta| match meta {
            Meta::NameValue(nv) if nv.path.is_ident(key) => match &nv.value {
                syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
                    Lit::Str(s) => Some(s.value()),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        })
}

/// Check for a bare `#[tool(flag)]`.
fn has_flag(attrs: &[Attribute], flag: &str) -> bool {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("tool"))
        .filter_map(|attr| attr.parse_args::<Meta>().ok())
        .any(|meta| matches!(meta, Meta::Path(path) if path.is_ident(flag)))
}

fn doc_comment(attrs: &[Attribute]) -> String {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
                    Lit::Str(s) => Some(s.value().trim().to_string()),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_option(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| segment.ident == "Option")
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(type_path) => type_path.path.segments.last(),
        _ => None,
    }
}

fn inner_type(segment: &syn::PathSegment) -> Option<&Type> {
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(args) => args.args.iter().find_map(|arg| match arg {
            syn::GenericArgument::Type(inner) => Some(inner),
            _ => None,
        }),
        _ => None,
    }
}

fn type_schema(ty: &Type) -> TokenStream2 {
    let Some(segment) = last_segment(ty) else {
        return quote! { serde_json::json!({}) };
    };

    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { serde_json::json!({"type": "string"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { serde_json::json!({"type": "number"}) },
        "bool" => quote! { serde_json::json!({"type": "boolean"}) },
        "Option" => match inner_type(segment) {
            Some(inner) => type_schema(inner),
            None => quote! { serde_json::json!({}) },
        },
        "Vec" => match inner_type(segment) {
            Some(inner) => {
                let items = type_schema(inner);
                quote! { serde_json::json!({"type": "array", "items": #items}) }
            }
            None => quote! { serde_json::json!({"type": "array"}) },
        },
        _ => quote! { serde_json::json!({"type": "object"}) },
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
