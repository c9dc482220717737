use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

/// Human readable enumeration of candidates used in diagnostics: `a, b or c`.
#[derive(Clone, PartialEq, Hash, Eq)]
pub struct List<C> {
    pub data: C,
    pub separator: &'static str,
    pub final_separator: &'static str,
    pub prefix: &'static str,
    pub postfix: &'static str,
}

impl<C> List<C> {
    pub fn new(contents: C) -> Self {
        Self { data: contents, separator: ", ", final_separator: " or ", prefix: "", postfix: "" }
    }

    pub fn surround(mut self, prefix: &'static str) -> Self {
        self.prefix = prefix;
        self.postfix = prefix;
        self
    }

    pub fn quoted(self) -> Self {
        self.surround("`")
    }

    pub fn with_separator(mut self, separator: &'static str) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_final_separator(mut self, final_separator: &'static str) -> Self {
        self.final_separator = final_separator;
        self
    }
}

impl<C: Debug> Debug for List<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.data, f)
    }
}

impl<X: Display, T: Deref<Target = [X]>> Display for List<T> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.data.deref() {
            [] => Ok(()),
            [x] => write!(f, "{}{}{}", self.prefix, x, self.postfix),
            [ref body @ .., second_last, last] => {
                for x in body {
                    write!(f, "{}{}{}{}", self.prefix, x, self.postfix, self.separator)?;
                }
                write!(
                    f,
                    "{}{}{}{}{}{}{}",
                    self.prefix,
                    second_last,
                    self.postfix,
                    self.final_separator,
                    self.prefix,
                    last,
                    self.postfix
                )
            }
        }
    }
}
