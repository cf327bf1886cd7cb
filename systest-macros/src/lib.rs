use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Attribute macro for harness tests with per-test tracing.
///
/// Async tests become `#[tokio::test(..)]` and the macro arguments are
/// passed through unchanged, so `start_paused = true` gives a paused clock
/// and `flavor = "multi_thread", worker_threads = 4` a multi-threaded
/// runtime. Sync tests become plain `#[test]` and take no arguments. Other
/// attributes on the function, such as `#[ignore = "..."]` or
/// `#[should_panic]`, are kept after the test attribute. The body runs inside
/// `systest::trace::with_test_tracing`.
///
/// ```ignore
/// #[systest::test]
/// fn parses() { ... }
///
/// #[systest::test(start_paused = true)]
/// async fn rounds_advance() { ... }
///
/// #[systest::test(flavor = "multi_thread", worker_threads = 4)]
/// #[ignore = "needs a Kubernetes cluster"]
/// async fn partition_heals() { ... }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args_ts = proc_macro2::TokenStream::from(attr);
    let input = parse_macro_input!(item as ItemFn);
    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = &input.sig.ident;

    let is_async = sig.asyncness.is_some();

    let paren_args = if args_ts.is_empty() {
        quote! {}
    } else {
        quote! { ( #args_ts ) }
    };

    let output = if is_async {
        quote! {
            #[tokio::test #paren_args]
            #(#attrs)*
            #vis #sig {
                systest::trace::with_test_tracing(stringify!(#name), || async move #block).await
            }
        }
    } else {
        quote! {
            #[test]
            #(#attrs)*
            #vis #sig {
                systest::trace::with_test_tracing_sync(stringify!(#name), || #block)
            }
        }
    };
    output.into()
}
