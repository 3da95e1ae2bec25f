// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Test macros for pim_mfc
//!
//! Tests that program the real kernel multicast routing table need root.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Skip this test unless running as root
///
/// Injects an effective-uid check at the start of the test function. A
/// non-root run prints a skip notice and returns before the body runs.
/// Combine with `#[ignore]` for tests that also need a kernel with
/// multicast routing support and no other routing daemon in the namespace.
///
/// ```ignore
/// #[test]
/// #[ignore]
/// #[requires_root]
/// fn test_linux_mfc_open() {
///     // only runs as root
/// }
/// ```
///
/// The test function must return `()`.
#[proc_macro_attribute]
pub fn requires_root(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = sig.ident.to_string();

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            if !nix::unistd::geteuid().is_root() {
                eprintln!("SKIPPED {}: requires root - run with: sudo -E cargo test -- --ignored", #name);
                return;
            }

            #block
        }
    };

    output.into()
}
