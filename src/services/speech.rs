use regex::Regex;

use super::LatexToSpeech;
use crate::utils::text::normalize_whitespace;
use crate::utils::IngestResult;

/// 规则式 LaTeX 朗读文本转换
pub struct RuleBasedSpeech {
    frac_re: Regex,
    sqrt_re: Regex,
    sup_group_re: Regex,
    sup_char_re: Regex,
    sub_group_re: Regex,
    sub_char_re: Regex,
    command_re: Regex,
}

const WORDS: &[(&str, &str)] = &[
    ("alpha", "alpha"),
    ("beta", "beta"),
    ("gamma", "gamma"),
    ("delta", "delta"),
    ("epsilon", "epsilon"),
    ("varepsilon", "epsilon"),
    ("zeta", "zeta"),
    ("eta", "eta"),
    ("theta", "theta"),
    ("kappa", "kappa"),
    ("lambda", "lambda"),
    ("mu", "mu"),
    ("nu", "nu"),
    ("xi", "xi"),
    ("pi", "pi"),
    ("rho", "rho"),
    ("sigma", "sigma"),
    ("tau", "tau"),
    ("phi", "phi"),
    ("varphi", "phi"),
    ("chi", "chi"),
    ("psi", "psi"),
    ("omega", "omega"),
    ("Gamma", "capital gamma"),
    ("Delta", "capital delta"),
    ("Theta", "capital theta"),
    ("Lambda", "capital lambda"),
    ("Sigma", "capital sigma"),
    ("Phi", "capital phi"),
    ("Omega", "capital omega"),
    ("sum", "the sum of"),
    ("prod", "the product of"),
    ("int", "the integral of"),
    ("partial", "partial"),
    ("nabla", "nabla"),
    ("infty", "infinity"),
    ("lim", "the limit of"),
    ("log", "log"),
    ("ln", "natural log"),
    ("exp", "exp"),
    ("sin", "sine"),
    ("cos", "cosine"),
    ("tan", "tangent"),
    ("cdot", "times"),
    ("times", "times"),
    ("div", "divided by"),
    ("pm", "plus or minus"),
    ("leq", "is less than or equal to"),
    ("le", "is less than or equal to"),
    ("geq", "is greater than or equal to"),
    ("ge", "is greater than or equal to"),
    ("neq", "is not equal to"),
    ("ne", "is not equal to"),
    ("approx", "is approximately"),
    ("equiv", "is equivalent to"),
    ("in", "in"),
    ("to", "to"),
    ("rightarrow", "goes to"),
    ("ldots", "dots"),
    ("cdots", "dots"),
];

impl RuleBasedSpeech {
    pub fn new() -> Self {
        Self {
            frac_re: Regex::new(r"\\frac\s*\{([^{}]*)\}\s*\{([^{}]*)\}").unwrap(),
            sqrt_re: Regex::new(r"\\sqrt\s*\{([^{}]*)\}").unwrap(),
            sup_group_re: Regex::new(r"\^\s*\{([^{}]*)\}").unwrap(),
            sup_char_re: Regex::new(r"\^\s*([A-Za-z0-9])").unwrap(),
            sub_group_re: Regex::new(r"_\s*\{([^{}]*)\}").unwrap(),
            sub_char_re: Regex::new(r"_\s*([A-Za-z0-9])").unwrap(),
            command_re: Regex::new(r"\\([A-Za-z]+)").unwrap(),
        }
    }

    fn strip_delimiters(expression: &str) -> String {
        let mut s = expression.trim().trim_matches('$').trim().to_string();
        for (open, close) in [(r"\(", r"\)"), (r"\[", r"\]"), ("(", r"\)"), ("[", r"\]")] {
            if let Some(inner) = s.strip_prefix(open).and_then(|r| r.strip_suffix(close)) {
                s = inner.to_string();
                break;
            }
        }
        s
    }

    fn replace_until_stable(re: &Regex, input: String, rep: &str) -> String {
        let mut current = input;
        loop {
            let next = re.replace_all(&current, rep).into_owned();
            if next == current {
                return next;
            }
            current = next;
        }
    }
}

impl Default for RuleBasedSpeech {
    fn default() -> Self {
        Self::new()
    }
}

impl LatexToSpeech for RuleBasedSpeech {
    fn convert(&self, expression: &str) -> IngestResult<String> {
        let mut s = Self::strip_delimiters(expression);

        // Innermost groups first so nested fractions read correctly.
        s = Self::replace_until_stable(&self.frac_re, s, " $1 over $2 ");
        s = Self::replace_until_stable(&self.sqrt_re, s, " the square root of $1 ");
        s = Self::replace_until_stable(&self.sup_group_re, s, " to the power of $1 ");
        s = self.sup_char_re.replace_all(&s, " to the power of $1 ").into_owned();
        s = Self::replace_until_stable(&self.sub_group_re, s, " sub $1 ");
        s = self.sub_char_re.replace_all(&s, " sub $1 ").into_owned();

        s = self
            .command_re
            .replace_all(&s, |caps: &regex::Captures| {
                let name = &caps[1];
                WORDS
                    .iter()
                    .find(|(cmd, _)| *cmd == name)
                    .map(|(_, word)| format!(" {word} "))
                    .unwrap_or_else(|| format!(" {name} "))
            })
            .into_owned();

        let mut spoken = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '=' => spoken.push_str(" equals "),
                '+' => spoken.push_str(" plus "),
                '-' => spoken.push_str(" minus "),
                '*' => spoken.push_str(" times "),
                '/' => spoken.push_str(" over "),
                '<' => spoken.push_str(" is less than "),
                '>' => spoken.push_str(" is greater than "),
                '{' | '}' | '\\' | '&' | '~' => spoken.push(' '),
                other => spoken.push(other),
            }
        }

        Ok(normalize_whitespace(&spoken))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn say(expr: &str) -> String {
        RuleBasedSpeech::new().convert(expr).unwrap()
    }

    #[test]
    fn inline_delimiters_left_after_backslash_strip_are_removed() {
        assert_eq!(say(r"$(x+y\)$"), "x plus y");
        assert_eq!(say(r"$[a=b\]$"), "a equals b");
    }

    #[test]
    fn fractions_roots_and_powers() {
        assert_eq!(say(r"\frac{a}{b}"), "a over b");
        assert_eq!(say(r"\sqrt{x^2}"), "the square root of x to the power of 2");
        assert_eq!(say(r"e^{i\pi}"), "e to the power of i pi");
        assert_eq!(say(r"x_{n+1}"), "x sub n plus 1");
    }

    #[test]
    fn commands_and_relations() {
        assert_eq!(say(r"\alpha \leq \beta"), "alpha is less than or equal to beta");
        assert_eq!(say(r"\sum_i x_i"), "the sum of sub i x sub i");
        assert_eq!(say(r"\mathbb{R}"), "mathbb R");
    }
}
