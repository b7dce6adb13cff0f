//! Engine action table.
//!
//! Engine functions ("actions") are called by index through the `ACTION` opcode. Their
//! names and signatures come from the game's `nwscript.nss` manifest, where the index of an
//! action is its position among the function declarations:
//!
//! ```text
//! // 0: Get an integer between 0 and nMaxInteger-1.
//! int Random(int nMaxInteger);
//!
//! int TRUE = 1;                 // constants are skipped
//!
//! void PrintString(string sString);
//! void DelayCommand(float fSeconds, action aActionToDelay);
//! ```
//!
//! # Example
//!
//! ```rust
//! use ncscope::{analysis::Type, decompiler::ActionTable};
//!
//! let table = ActionTable::parse("int Random(int nMax);\nvoid PrintInteger(int n);")?;
//! assert_eq!(table.name(1), Some("PrintInteger"));
//! assert_eq!(table.return_type(0), Some(&Type::Int));
//! # Ok::<(), ncscope::Error>(())
//! ```

use std::{collections::HashMap, path::Path};

use tracing::debug;

use crate::{analysis::Type, decompiler::GameVariant, Error, File, Result};

/// One parameter of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionParam {
    /// Declared type
    pub ty: Type,
    /// Declared name
    pub name: String,
    /// Default value as written in the manifest
    pub default: Option<String>,
}

/// Signature of one engine action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDef {
    /// Action index
    pub index: usize,
    /// Function name
    pub name: String,
    /// Return type
    pub ret: Type,
    /// Parameters in declaration order
    pub params: Vec<ActionParam>,
}

impl ActionDef {
    /// Stack size in slots of the first `argc` parameters.
    #[must_use]
    pub fn param_stack_size(&self, argc: usize) -> usize {
        self.params.iter().take(argc).map(|p| p.ty.size()).sum()
    }
}

/// Lookup table of engine actions by index.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    actions: Vec<ActionDef>,
    by_name: HashMap<String, usize>,
}

impl ActionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from action definitions, re-indexed in order.
    #[must_use]
    pub fn from_defs(defs: impl IntoIterator<Item = ActionDef>) -> Self {
        let mut table = ActionTable::new();
        for mut def in defs {
            def.index = table.actions.len();
            table.by_name.insert(def.name.clone(), def.index);
            table.actions.push(def);
        }
        table
    }

    /// Parses an `nwscript.nss` style manifest.
    ///
    /// Comments, preprocessor lines and constant definitions are skipped. Declarations may
    /// span several lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ActionTable`] for declarations with an unknown type or a malformed
    /// parameter list.
    pub fn parse(text: &str) -> Result<Self> {
        let text = strip_comments(text);
        let mut defs = Vec::new();

        let mut statement = String::new();
        let mut statement_line = 0;
        let mut depth = 0usize;
        let mut in_string = false;
        for (number, line) in text.lines().enumerate() {
            if statement.trim().is_empty() && line.trim_start().starts_with('#') {
                continue;
            }
            for c in line.chars() {
                if statement.trim().is_empty() && !c.is_whitespace() {
                    statement_line = number + 1;
                }
                match c {
                    '"' => in_string = !in_string,
                    '(' if !in_string => depth += 1,
                    ')' if !in_string => depth = depth.saturating_sub(1),
                    ';' if !in_string && depth == 0 => {
                        if let Some(def) = parse_declaration(statement.trim(), statement_line)? {
                            defs.push(def);
                        }
                        statement.clear();
                        continue;
                    }
                    _ => {}
                }
                statement.push(c);
            }
            statement.push('\n');
        }

        let table = ActionTable::from_defs(defs);
        debug!(actions = table.len(), "parsed action manifest");
        Ok(table)
    }

    /// Loads the manifest of `game` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the manifest cannot be read, or a parse error.
    pub fn for_game(game: GameVariant, dir: &Path) -> Result<Self> {
        Self::from_file(&dir.join(game.action_manifest_name()))
    }

    /// Loads a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be read, or a parse error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::from_file(path)?;
        Self::parse(&String::from_utf8_lossy(file.data()))
    }

    /// Action at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ActionDef> {
        self.actions.get(index)
    }

    /// Index of the action called `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Name of the action at `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.get(index).map(|a| a.name.as_str())
    }

    /// Return type of the action at `index`.
    #[must_use]
    pub fn return_type(&self, index: usize) -> Option<&Type> {
        self.get(index).map(|a| &a.ret)
    }

    /// Parameter types of the action at `index`.
    #[must_use]
    pub fn param_types(&self, index: usize) -> Option<Vec<Type>> {
        self.get(index)
            .map(|a| a.params.iter().map(|p| p.ty.clone()).collect())
    }

    /// Stack size in slots of the first `argc` parameters of the action at `index`.
    #[must_use]
    pub fn param_stack_size(&self, index: usize, argc: usize) -> Option<usize> {
        self.get(index).map(|a| a.param_stack_size(argc))
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if the table holds no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Blanks out `//` and `/* */` comments, keeping line breaks.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' => {
                in_string = false;
                out.push(c);
            }
            '/' if !in_string && chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if !in_string && chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = ' ';
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && skipped == '/' {
                        break;
                    }
                    previous = skipped;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

fn parse_declaration(statement: &str, line: usize) -> Result<Option<ActionDef>> {
    let error = |message: String| Error::ActionTable { line, message };

    let Some(open) = statement.find('(') else {
        return Ok(None);
    };
    if statement[..open].contains('=') {
        return Ok(None);
    }
    let Some(close) = statement.rfind(')') else {
        return Err(error(format!("unterminated parameter list in '{statement}'")));
    };

    let head: Vec<&str> = statement[..open].split_whitespace().collect();
    let [ret, name] = head.as_slice() else {
        return Err(error(format!("cannot parse declaration '{statement}'")));
    };
    let ret = Type::from_keyword(ret).ok_or_else(|| error(format!("unknown type '{ret}'")))?;

    let mut params = Vec::new();
    for param in split_params(&statement[open + 1..close]) {
        let (decl, default) = match split_default(param) {
            Some((decl, default)) => (decl, Some(default.trim().to_string())),
            None => (param, None),
        };
        let words: Vec<&str> = decl.split_whitespace().collect();
        let [ty, param_name] = words.as_slice() else {
            return Err(error(format!("cannot parse parameter '{}'", param.trim())));
        };
        let ty = Type::from_keyword(ty)
            .filter(|t| *t != Type::Void)
            .ok_or_else(|| error(format!("unknown parameter type '{ty}'")))?;
        params.push(ActionParam {
            ty,
            name: (*param_name).to_string(),
            default,
        });
    }

    Ok(Some(ActionDef {
        index: 0,
        name: (*name).to_string(),
        ret,
        params,
    }))
}

/// Splits a parameter list on top-level commas.
fn split_params(list: &str) -> Vec<&str> {
    if list.trim().is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '(' | '[' if !in_string => depth += 1,
            ')' | ']' if !in_string => depth = depth.saturating_sub(1),
            ',' if !in_string && depth == 0 => {
                out.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&list[start..]);
    out
}

fn split_default(param: &str) -> Option<(&str, &str)> {
    let mut in_string = false;
    for (i, c) in param.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '=' if !in_string => return Some((&param[..i], &param[i + 1..])),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
// Constants
#define ENGINE_NUM_STRUCTURES 4
int TRUE = 1;
string sEmpty = "(not a call)";

/* 0: Random */
int Random(int nMaxInteger);
void PrintString(string sString);   // 1
void DelayCommand(float fSeconds,
                  action aActionToDelay);
vector GetPosition(object oTarget = OBJECT_SELF);
location Location(vector vPosition = [0.0, 0.0, 0.0], float fOrientation = 0.0);
void SendMessage(string sMessage = "a,b; c", int nFlags = 0);
"#;

    #[test]
    fn test_parse_manifest() {
        let table = ActionTable::parse(MANIFEST).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.name(0), Some("Random"));
        assert_eq!(table.name(2), Some("DelayCommand"));
        assert_eq!(table.index_of("GetPosition"), Some(3));
        assert_eq!(table.return_type(3), Some(&Type::Vector));
        assert_eq!(
            table.param_types(2),
            Some(vec![Type::Float, Type::Action])
        );

        let location = table.get(4).unwrap();
        assert_eq!(location.params.len(), 2);
        assert_eq!(
            location.params[0].default.as_deref(),
            Some("[0.0, 0.0, 0.0]")
        );

        let message = table.get(5).unwrap();
        assert_eq!(message.params[0].default.as_deref(), Some("\"a,b; c\""));
    }

    #[test]
    fn test_param_stack_size() {
        let table = ActionTable::parse(MANIFEST).unwrap();
        assert_eq!(table.param_stack_size(2, 2), Some(1));
        assert_eq!(table.param_stack_size(4, 1), Some(3));
        assert_eq!(table.param_stack_size(4, 2), Some(4));
        assert_eq!(table.param_stack_size(99, 0), None);
    }

    #[test]
    fn test_parse_unknown_type() {
        let error = ActionTable::parse("int A();\nwidget B(int n);").unwrap_err();
        assert!(matches!(error, Error::ActionTable { line: 2, .. }));
    }
}
