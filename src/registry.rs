//! Procedure definitions extracted from a parsed program.
//!
//! A program is a sequence of top-level forms of the shape
//!
//! ```text
//! (DEFINE_PROCEDURE Name (param ...) statement ...)
//! ```
//!
//! When the only statement is a `(SEQ ...)` form, its children become the
//! statement list. Forms with any other head are not definitions and are
//! skipped.

use std::collections::HashMap;

use crate::Error;
use crate::ast::Expr;

/// Head symbol of a procedure definition form
pub const DEFINE_PROCEDURE: &str = "DEFINE_PROCEDURE";

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<String>,
    /// Statements executed in order when the procedure is called
    pub body: Vec<Expr>,
}

impl Procedure {
    /// Build a procedure from the arguments of a `DEFINE_PROCEDURE` form
    fn from_definition(args: &[Expr]) -> Result<Self, Error> {
        let [name_expr, params_expr, statements @ ..] = args else {
            return Err(Error::InvalidDefinition(format!(
                "expected a name and a parameter list, got {} argument(s)",
                args.len()
            )));
        };

        let Expr::Symbol(name) = name_expr else {
            return Err(Error::InvalidDefinition(format!(
                "procedure name must be a symbol, got {name_expr}"
            )));
        };

        let Expr::List(param_list) = params_expr else {
            return Err(Error::InvalidDefinition(format!(
                "parameters of '{name}' must be a list, got {params_expr}"
            )));
        };

        let mut params: Vec<String> = Vec::with_capacity(param_list.len());
        for param in param_list {
            match param {
                Expr::Symbol(p) if params.contains(p) => {
                    return Err(Error::InvalidDefinition(format!(
                        "duplicate parameter '{p}' in '{name}'"
                    )));
                }
                Expr::Symbol(p) => params.push(p.clone()),
                other => {
                    return Err(Error::InvalidDefinition(format!(
                        "parameters of '{name}' must be symbols, got {other}"
                    )));
                }
            }
        }

        let body = match statements {
            [single] if single.head_symbol() == Some("SEQ") => single.tail().to_vec(),
            _ => statements.to_vec(),
        };

        Ok(Procedure {
            name: name.clone(),
            params,
            body,
        })
    }
}

/// Procedures of a loaded program, keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Procedure>,
}

impl ProcedureRegistry {
    /// Collect every `DEFINE_PROCEDURE` form among `forms`
    ///
    /// Fails on the first malformed definition or repeated name.
    pub fn build(forms: &[Expr]) -> Result<Self, Error> {
        let mut procedures = HashMap::new();

        for form in forms {
            if form.head_symbol() != Some(DEFINE_PROCEDURE) {
                tracing::warn!(form = %form, "skipping top-level form that is not a procedure definition");
                continue;
            }

            let procedure = Procedure::from_definition(form.tail())?;
            if procedures.contains_key(&procedure.name) {
                return Err(Error::DuplicateProcedure(procedure.name));
            }
            procedures.insert(procedure.name.clone(), procedure);
        }

        Ok(ProcedureRegistry { procedures })
    }

    pub fn lookup(&self, name: &str) -> Result<&Procedure, Error> {
        self.procedures
            .get(name)
            .ok_or_else(|| Error::ProcedureNotFound(name.to_owned()))
    }

    pub fn get(&self, name: &str) -> Option<&Procedure> {
        self.procedures.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Procedure names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{list, string, sym};
    use crate::parser::parse_program;

    fn build(source: &str) -> Result<ProcedureRegistry, Error> {
        ProcedureRegistry::build(&parse_program(source).unwrap())
    }

    #[test]
    fn test_build_and_lookup() {
        let registry = build(
            r#"
            (DEFINE_PROCEDURE OnSystemInit () (SEQ (SET_STATE sys.mode "IDLE") (FLUSH_USER_OUTPUT_BUFFER)))
            (DEFINE_PROCEDURE OnUserInput (raw_text) (CALL_PROCEDURE Dispatch raw_text))
            (DEFINE_PROCEDURE Noop ())
            "#,
        )
        .unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names(), vec!["Noop", "OnSystemInit", "OnUserInput"]);

        // A lone SEQ body is flattened into statements
        let init = registry.lookup("OnSystemInit").unwrap();
        assert!(init.params.is_empty());
        assert_eq!(
            init.body,
            vec![
                list([sym("SET_STATE"), sym("sys.mode"), string("IDLE")]),
                list([sym("FLUSH_USER_OUTPUT_BUFFER")]),
            ]
        );

        let input = registry.lookup("OnUserInput").unwrap();
        assert_eq!(input.params, vec!["raw_text"]);
        assert_eq!(
            input.body,
            vec![list([sym("CALL_PROCEDURE"), sym("Dispatch"), sym("raw_text")])]
        );

        assert!(registry.lookup("Noop").unwrap().body.is_empty());
        assert!(registry.contains("Noop"));
        assert_eq!(registry.iter().count(), 3);
    }

    #[test]
    fn test_multiple_statements_are_kept_in_order() {
        let registry = build("(DEFINE_PROCEDURE P (a) (SEQ (x)) (y))").unwrap();
        assert_eq!(
            registry.lookup("P").unwrap().body,
            vec![list([sym("SEQ"), list([sym("x")])]), list([sym("y")])]
        );
    }

    #[test]
    fn test_unknown_procedure() {
        let registry = build("(DEFINE_PROCEDURE A ())").unwrap();
        assert_eq!(
            registry.lookup("B"),
            Err(Error::ProcedureNotFound("B".into()))
        );
        assert!(registry.get("B").is_none());
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let result = build(
            r#"
            (DEFINE_PROCEDURE Help () (OUTPUT_TO_USER_BUFFER "A" "first" NIL))
            (DEFINE_PROCEDURE Other ())
            (DEFINE_PROCEDURE Help () (OUTPUT_TO_USER_BUFFER "A" "second" NIL))
            "#,
        );
        assert_eq!(result, Err(Error::DuplicateProcedure("Help".into())));
    }

    #[test]
    fn test_non_definitions_are_skipped() {
        let registry = build(r#"(SET_STATE a "1") "loose" (DEFINE_PROCEDURE A ())"#).unwrap();
        assert_eq!(registry.names(), vec!["A"]);
        assert!(build("").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_definitions() {
        let cases = [
            "(DEFINE_PROCEDURE)",
            "(DEFINE_PROCEDURE Name)",
            "(DEFINE_PROCEDURE \"Name\" ())",
            "(DEFINE_PROCEDURE Name params)",
            "(DEFINE_PROCEDURE Name (a \"b\"))",
            "(DEFINE_PROCEDURE Name (a a))",
        ];
        for source in cases {
            assert!(
                matches!(build(source), Err(Error::InvalidDefinition(_))),
                "source {source} should be rejected"
            );
        }
    }
}
