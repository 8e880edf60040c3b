//! Command-line options shared by every Switchyard application.
//!
//! The framework recognises `--name`, `--daemonize`, `--logging_level`, and
//! `--help` (with their short forms) and strips them from the argument
//! vector; everything else is handed back to the application untouched.
//! Because unrecognised tokens are preserved verbatim, parsing the
//! remainder of a parse is a fixed point.

/// Result of scanning an argument vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    /// Value of `--name`/`-n`, if present.
    pub service_name: Option<String>,
    /// Whether `--daemonize`/`-d` was given.
    pub run_as_daemon: bool,
    /// Value of `--logging_level`/`-l`, if present. Validated later by the
    /// logger, not here.
    pub logging_level: Option<String>,
    /// Whether `--help`/`-h` was given.
    pub show_help: bool,
    /// The program name followed by every token the framework does not
    /// recognise, in their original order.
    pub remaining: Vec<String>,
}

/// Recognised options, used while classifying one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opt {
    Name,
    Daemonize,
    LoggingLevel,
    Help,
}

impl Opt {
    fn from_long(option: &str) -> Option<Self> {
        match option {
            "name" => Some(Self::Name),
            "daemonize" => Some(Self::Daemonize),
            "logging_level" => Some(Self::LoggingLevel),
            "help" => Some(Self::Help),
            _ => None,
        }
    }

    fn from_short(option: char) -> Option<Self> {
        match option {
            'n' => Some(Self::Name),
            'd' => Some(Self::Daemonize),
            'l' => Some(Self::LoggingLevel),
            'h' => Some(Self::Help),
            _ => None,
        }
    }

    fn takes_value(self) -> bool {
        matches!(self, Self::Name | Self::LoggingLevel)
    }
}

/// Scan an argument vector, starting with the program name.
///
/// Accepted forms: `--option value`, `--option=value`, `-o value`,
/// `-ovalue`, and clusters of value-less shorts such as `-dh`. A `--` token
/// ends recognition; it and everything after it stay in `remaining`. An
/// option missing its value, a flag given an inline value, and any mixed or
/// unknown short cluster are left in `remaining` untouched.
#[must_use]
pub fn parse<I>(args: I) -> ParsedArgs
where
    I: IntoIterator<Item = String>,
{
    let mut argv = args.into_iter();
    let mut parsed = ParsedArgs::default();
    if let Some(program) = argv.next() {
        parsed.remaining.push(program);
    }
    let rest: Vec<String> = argv.collect();

    let mut index = 0;
    while index < rest.len() {
        let token = &rest[index];
        let mut consumed_next = false;

        if token == "--" {
            parsed.remaining.extend(rest[index..].iter().cloned());
            break;
        }

        if let Some(long) = token.strip_prefix("--") {
            let (option, inline) = match long.split_once('=') {
                Some((option, value)) => (option, Some(value.to_string())),
                None => (long, None),
            };
            match Opt::from_long(option) {
                Some(opt) if opt.takes_value() => {
                    let value = inline.or_else(|| {
                        rest.get(index + 1).map(|next| {
                            consumed_next = true;
                            next.clone()
                        })
                    });
                    match value {
                        Some(value) => parsed.set_value(opt, value),
                        None => parsed.remaining.push(token.clone()),
                    }
                }
                Some(opt) if inline.is_none() => parsed.set_flag(opt),
                _ => parsed.remaining.push(token.clone()),
            }
        } else if let Some(cluster) = token.strip_prefix('-').filter(|c| !c.is_empty()) {
            let mut chars = cluster.chars();
            let first = chars.next().and_then(Opt::from_short);
            let attachment: String = chars.collect();

            match first {
                Some(opt) if opt.takes_value() => {
                    let value = if attachment.is_empty() {
                        rest.get(index + 1).map(|next| {
                            consumed_next = true;
                            next.clone()
                        })
                    } else {
                        Some(attachment)
                    };
                    match value {
                        Some(value) => parsed.set_value(opt, value),
                        None => parsed.remaining.push(token.clone()),
                    }
                }
                _ => {
                    // Only a cluster made purely of value-less options is
                    // recognised; anything mixed or unknown passes through.
                    let flags: Option<Vec<Opt>> = cluster
                        .chars()
                        .map(|c| Opt::from_short(c).filter(|o| !o.takes_value()))
                        .collect();
                    match flags {
                        Some(flags) => {
                            for flag in flags {
                                parsed.set_flag(flag);
                            }
                        }
                        None => parsed.remaining.push(token.clone()),
                    }
                }
            }
        } else {
            parsed.remaining.push(token.clone());
        }

        index += if consumed_next { 2 } else { 1 };
    }

    parsed
}

impl ParsedArgs {
    fn set_value(&mut self, opt: Opt, value: String) {
        match opt {
            Opt::Name => self.service_name = Some(value),
            Opt::LoggingLevel => self.logging_level = Some(value),
            Opt::Daemonize | Opt::Help => {}
        }
    }

    fn set_flag(&mut self, opt: Opt) {
        match opt {
            Opt::Daemonize => self.run_as_daemon = true,
            Opt::Help => self.show_help = true,
            Opt::Name | Opt::LoggingLevel => {}
        }
    }
}

/// Print the standard option table to stdout.
#[allow(clippy::print_stdout)]
pub fn usage(executable_name: &str) {
    println!(
        "Usage: {executable_name} [OPTION]...\n\
         \n\
         \x20 -n, --name=SERVICE_NAME     service name\n\
         \x20 -d, --daemonize             run in the background\n\
         \x20 -l, --logging_level=LEVEL   set logging level\n\
         \x20 -h, --help                  display this help and exit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn recognised_options_are_stripped_and_the_rest_kept() {
        let parsed = parse(argv(&["app", "HELLO", "-d", "-n", "svc", "-u"]));

        assert_eq!(parsed.remaining, argv(&["app", "HELLO", "-u"]));
        assert_eq!(parsed.service_name.as_deref(), Some("svc"));
        assert!(parsed.run_as_daemon);
        assert!(!parsed.show_help);
    }

    #[test]
    fn long_options_accept_both_split_and_equals_forms() {
        let split = parse(argv(&["app", "--name", "alpha", "--logging_level", "debug"]));
        let joined = parse(argv(&["app", "--name=alpha", "--logging_level=debug"]));

        for parsed in [split, joined] {
            assert_eq!(parsed.service_name.as_deref(), Some("alpha"));
            assert_eq!(parsed.logging_level.as_deref(), Some("debug"));
            assert_eq!(parsed.remaining, argv(&["app"]));
        }
    }

    #[test]
    fn short_options_accept_attached_values() {
        let parsed = parse(argv(&["app", "-nsvc", "-ldebug"]));

        assert_eq!(parsed.service_name.as_deref(), Some("svc"));
        assert_eq!(parsed.logging_level.as_deref(), Some("debug"));
        assert_eq!(parsed.remaining, argv(&["app"]));
    }

    #[test]
    fn later_occurrences_win() {
        let parsed = parse(argv(&["app", "-n", "first", "--name=second"]));

        assert_eq!(parsed.service_name.as_deref(), Some("second"));
    }

    #[test]
    fn flag_clusters_are_recognised() {
        let parsed = parse(argv(&["app", "-dh"]));

        assert!(parsed.run_as_daemon);
        assert!(parsed.show_help);
        assert_eq!(parsed.remaining, argv(&["app"]));
    }

    #[test]
    fn mixed_clusters_pass_through_untouched() {
        let parsed = parse(argv(&["app", "-du"]));

        assert!(!parsed.run_as_daemon);
        assert_eq!(parsed.remaining, argv(&["app", "-du"]));
    }

    #[test]
    fn option_missing_its_value_stays_in_place() {
        let parsed = parse(argv(&["app", "-n"]));

        assert_eq!(parsed.service_name, None);
        assert_eq!(parsed.remaining, argv(&["app", "-n"]));
    }

    #[test]
    fn double_dash_ends_recognition() {
        let parsed = parse(argv(&["app", "-d", "--", "-n", "svc"]));

        assert!(parsed.run_as_daemon);
        assert_eq!(parsed.service_name, None);
        assert_eq!(parsed.remaining, argv(&["app", "--", "-n", "svc"]));
    }

    #[test]
    fn flag_with_inline_value_is_not_recognised() {
        let parsed = parse(argv(&["app", "--daemonize=yes"]));

        assert!(!parsed.run_as_daemon);
        assert_eq!(parsed.remaining, argv(&["app", "--daemonize=yes"]));
    }

    #[test]
    fn parsing_the_remainder_is_a_fixed_point() {
        let parsed = parse(argv(&["app", "HELLO", "-d", "-n", "svc", "-u", "--", "-h"]));
        let again = parse(parsed.remaining.clone());

        assert_eq!(again.remaining, parsed.remaining);
        assert!(!again.run_as_daemon);
        assert_eq!(again.service_name, None);
    }
}
