use crate::diagnostics::Diagnostic;

/// One `class Name [: Base] { body }` declaration found in a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDeclaration {
    pub name: String,
    pub base: Option<String>,
    pub body: String,
    pub line: usize,
    pub column: usize,
    /// Location of the first character after the opening brace.
    pub body_line: usize,
    pub body_column: usize,
}

pub fn scan_unit(source: &str) -> Result<Vec<TypeDeclaration>, Diagnostic> {
    let mut scanner = Scanner::new(source);
    let mut declarations = Vec::new();
    loop {
        scanner.skip_trivia()?;
        let Some(next) = scanner.peek() else {
            break;
        };
        let (line, column) = scanner.location();
        match scanner.ident() {
            Some(keyword) if keyword == "class" => {}
            Some(other) => {
                return Err(Diagnostic::error(line, column, format!("expected 'class' declaration, found '{other}'")))
            }
            None => {
                return Err(Diagnostic::error(
                    line,
                    column,
                    format!("unexpected '{next}' outside of a class declaration"),
                ))
            }
        }

        scanner.skip_trivia()?;
        let (name_line, name_column) = scanner.location();
        let name = scanner
            .ident()
            .ok_or_else(|| Diagnostic::error(name_line, name_column, "expected a type name after 'class'"))?;

        scanner.skip_trivia()?;
        let base = if scanner.peek() == Some(':') {
            scanner.bump();
            scanner.skip_trivia()?;
            let (base_line, base_column) = scanner.location();
            let base = scanner.ident().ok_or_else(|| {
                Diagnostic::error(base_line, base_column, format!("expected a base type for '{name}' after ':'"))
            })?;
            scanner.skip_trivia()?;
            Some(base)
        } else {
            None
        };

        let (open_line, open_column) = scanner.location();
        if scanner.peek() != Some('{') {
            return Err(Diagnostic::error(
                open_line,
                open_column,
                format!("expected '{{' to open the body of '{name}'"),
            ));
        }
        scanner.bump();
        let (body_line, body_column) = scanner.location();
        let body = scanner.body(&name, open_line, open_column)?;
        declarations.push(TypeDeclaration { name, base, body, line, column, body_line, body_column });
    }
    Ok(declarations)
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self { chars: source.chars().collect(), pos: 0, line: 1, column: 1 }
    }

    fn location(&self) -> (usize, usize) {
        (self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => self.skip_line_comment(),
                (Some('/'), Some('*')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), Diagnostic> {
        let (line, column) = self.location();
        self.bump();
        self.bump();
        let mut depth = 1usize;
        while depth > 0 {
            match (self.peek(), self.peek_at(1)) {
                (None, _) => return Err(Diagnostic::error(line, column, "unterminated block comment")),
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                }
                _ => {
                    self.bump();
                }
            }
        }
        Ok(())
    }

    fn ident(&mut self) -> Option<String> {
        let first = self.peek()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Some(ident)
    }

    fn skip_string(&mut self, quote: char) -> Result<(), Diagnostic> {
        let (line, column) = self.location();
        self.bump();
        loop {
            match self.bump() {
                None => return Err(Diagnostic::error(line, column, "unterminated string literal")),
                Some('\\') => {
                    self.bump();
                }
                Some(c) if c == quote => return Ok(()),
                Some(_) => {}
            }
        }
    }

    fn skip_char_literal(&mut self) {
        self.bump();
        if self.peek() == Some('\\') {
            self.bump();
        }
        self.bump();
        if self.peek() == Some('\'') {
            self.bump();
        }
    }

    /// Consumes a body up to and including its closing brace and returns the text in between.
    fn body(&mut self, name: &str, open_line: usize, open_column: usize) -> Result<String, Diagnostic> {
        let start = self.pos;
        let mut depth = 1usize;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (None, _) => {
                    return Err(Diagnostic::error(
                        open_line,
                        open_column,
                        format!("body of '{name}' is missing its closing '}}'"),
                    ))
                }
                (Some('{'), _) => {
                    depth += 1;
                    self.bump();
                }
                (Some('}'), _) => {
                    depth -= 1;
                    if depth == 0 {
                        let body = self.chars[start..self.pos].iter().collect();
                        self.bump();
                        return Ok(body);
                    }
                    self.bump();
                }
                (Some(quote @ ('"' | '`')), _) => self.skip_string(quote)?,
                (Some('\''), _) => self.skip_char_literal(),
                (Some('/'), Some('/')) => self.skip_line_comment(),
                (Some('/'), Some('*')) => self.skip_block_comment()?,
                _ => {
                    self.bump();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_single_declaration_with_base() {
        let decls = scan_unit("class Foo : Behaviour {}").expect("scan");
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "Foo");
        assert_eq!(decls[0].base.as_deref(), Some("Behaviour"));
        assert_eq!(decls[0].body, "");
        assert_eq!((decls[0].line, decls[0].column), (1, 1));
    }

    #[test]
    fn braces_inside_strings_and_comments_do_not_close_the_body() {
        let source = r#"
// leading comment
class Greeter : Behaviour {
    let greeting = "}{";
    let brace = '}';
    /* } */
    fn ready(entity) { log(`hello ${entity}`); } // }
}
/* trailing */
"#;
        let decls = scan_unit(source).expect("scan");
        assert_eq!(decls.len(), 1);
        assert!(decls[0].body.contains("fn ready(entity)"));
        assert!(decls[0].body.trim_end().ends_with("// }"));
        assert_eq!(decls[0].line, 3);
        assert_eq!((decls[0].body_line, decls[0].body_column), (3, 28));
    }

    #[test]
    fn scans_multiple_declarations_including_baseless_ones() {
        let decls = scan_unit("class A : Behaviour { let x = 1; }\nclass Marker_1 {}").expect("scan");
        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["A", "Marker_1"]);
        assert_eq!(decls[1].base, None);
        assert_eq!(decls[1].line, 2);
    }

    #[test]
    fn rejects_statements_outside_declarations() {
        let err = scan_unit("let x = 5;").unwrap_err();
        assert!(err.text.contains("expected 'class'"), "{}", err.text);
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn reports_unterminated_body_at_opening_brace() {
        let err = scan_unit("class Foo : Behaviour {\n  fn ready(e) {\n").unwrap_err();
        assert!(err.text.contains("closing"), "{}", err.text);
        assert_eq!((err.line, err.column), (1, 23));
    }

    #[test]
    fn reports_missing_base_name() {
        let err = scan_unit("class Foo : { }").unwrap_err();
        assert!(err.text.contains("base type"), "{}", err.text);
    }
}
