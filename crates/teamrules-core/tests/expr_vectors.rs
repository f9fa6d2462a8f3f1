//! Expression parser vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use teamrules_core::expr::parse_expr;

#[test]
fn expression_vectors() {
    let vectors = vector_loader::load_expr_vectors("expressions.json");
    assert!(!vectors.is_empty());

    for v in vectors {
        let got = parse_expr(&v.expr);
        match (&v.expect, &v.expect_error) {
            (Some(want), None) => {
                let expr = got.unwrap_or_else(|e| panic!("{}: unexpected error {e}", v.description));
                assert_eq!(&expr.to_string(), want, "{}", v.description);
            }
            (None, Some(err)) => {
                let e = got.expect_err(&v.description);
                assert_eq!(e.offset, err.offset, "{}: {e}", v.description);
            }
            _ => panic!("{}: vector needs exactly one of expect/expect_error", v.description),
        }
    }
}
