//! `sort` command line front end

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::io::Read;
use std::process;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use gnu_extsort::{
    config::{
        encoding_for_label, parse_encoding_pair, parse_header, parse_locale_pair, BufferSize,
        CheckKind, FieldSeparator, KeyOptions, ProcessKind, SortConfig, SortConfigBuilder,
        SortKind,
    },
    error::{SortContext, SortError, SortResult},
    locale::LocaleSpec,
    ExitStatus,
};

/// Global ordering flags and the option letter each one stands for
const ORDERING_FLAGS: [(&str, char); 11] = [
    ("ignore-leading-blanks", 'b'),
    ("dictionary-order", 'd'),
    ("ignore-case", 'f'),
    ("general-numeric-sort", 'g'),
    ("human-numeric-sort", 'h'),
    ("ignore-nonprinting", 'i'),
    ("month-sort", 'M'),
    ("numeric-sort", 'n'),
    ("random-sort", 'R'),
    ("reverse", 'r'),
    ("version-sort", 'V'),
];

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprint!("{}", error_report(&e));
            e.exit_code()
        }
    };
    process::exit(code);
}

/// Text printed to stderr for a fatal error
fn error_report(err: &SortError) -> String {
    if err.is_configuration_error() {
        format!("sort: {err}\nTry 'sort --help' for more information.\n")
    } else {
        format!("sort: {err}\n")
    }
}

fn run() -> SortResult<i32> {
    let args: Vec<String> = std::env::args().collect();
    let matches = build_cli().get_matches_from(convert_legacy_syntax(&args));
    let config = parse_config_from_matches(&matches)?;
    init_logging(config.debug);

    let status = gnu_extsort::run(&config)?;
    if let ExitStatus::Disorder(violation) = &status {
        if config.process != ProcessKind::Check(CheckKind::Quiet) {
            eprintln!(
                "sort: {}:{}: disorder: {}",
                violation.file, violation.line, violation.text
            );
        }
    }
    Ok(status.code())
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("SORT_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn flag(id: &'static str, short: char, long: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .short(short)
        .long(long)
        .help(help)
        .action(ArgAction::SetTrue)
}

fn build_cli() -> Command {
    Command::new("sort")
        .version(env!("CARGO_PKG_VERSION"))
        .override_usage("sort [OPTION]... [FILE]...\n       sort [OPTION]... --files0-from=F")
        .about("Write sorted concatenation of all FILE(s) to standard output")
        .disable_help_flag(true) // -h is --human-numeric-sort
        .disable_version_flag(true) // -V is --version-sort

        .arg(Arg::new("files")
            .help("Input files; '-' or none reads standard input")
            .num_args(0..)
            .value_name("FILE"))

        // Ordering options
        .arg(flag("ignore-leading-blanks", 'b', "ignore-leading-blanks", "Ignore leading blanks"))
        .arg(flag("dictionary-order", 'd', "dictionary-order", "Consider only blanks and alphanumeric characters"))
        .arg(flag("ignore-case", 'f', "ignore-case", "Fold lower case to upper case characters"))
        .arg(flag("general-numeric-sort", 'g', "general-numeric-sort", "Compare according to general numerical value"))
        .arg(flag("ignore-nonprinting", 'i', "ignore-nonprinting", "Consider only printable characters"))
        .arg(flag("month-sort", 'M', "month-sort", "Compare (unknown) < 'JAN' < ... < 'DEC'"))
        .arg(flag("human-numeric-sort", 'h', "human-numeric-sort", "Compare human readable numbers (e.g., 2K 1G)"))
        .arg(flag("numeric-sort", 'n', "numeric-sort", "Compare according to string numerical value"))
        .arg(flag("random-sort", 'R', "random-sort", "Shuffle, but group identical keys"))
        .arg(Arg::new("random-source")
            .long("random-source")
            .help("Get random bytes from FILE")
            .value_name("FILE"))
        .arg(flag("reverse", 'r', "reverse", "Reverse the result of comparisons"))
        .arg(Arg::new("sort")
            .long("sort")
            .help("Sort according to WORD: general-numeric -g, human-numeric -h, month -M, numeric -n, random -R, version -V")
            .value_name("WORD")
            .value_parser(["general-numeric", "human-numeric", "month", "numeric", "random", "version"]))
        .arg(flag("version-sort", 'V', "version-sort", "Natural sort of (version) numbers within text"))

        // Other options
        .arg(Arg::new("batch-size")
            .long("batch-size")
            .help("Merge at most NMERGE inputs at once; for more use temp files")
            .value_name("NMERGE"))
        .arg(Arg::new("check")
            .short('c')
            .long("check")
            .help("Check for sorted input; do not sort")
            .value_name("WHEN")
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("diagnose-first"))
        .arg(flag("check-quiet", 'C', "check-quiet", "Like -c, but do not report first bad line"))
        .arg(Arg::new("compress-program")
            .long("compress-program")
            .help("Compress temporaries with PROG; decompress them with PROG -d")
            .value_name("PROG"))
        .arg(Arg::new("debug")
            .long("debug")
            .help("Warn about questionable usage and log progress to standard error")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("files0-from")
            .long("files0-from")
            .help("Read input file names from F, NUL separated; F[,encoding=CHARSET][,sep='CHARS']")
            .value_name("F"))
        .arg(Arg::new("key")
            .short('k')
            .long("key")
            .help("Sort via a key; KEYDEF gives location and type")
            .long_help("Sort via a key; KEYDEF gives location and type.\n\nKEYDEF is F[.C][OPTS][,F[.C][OPTS]] for start and stop position, where F is a field number and C a character position in the field; both are origin 1, and the stop position defaults to the line's end. If neither -t nor -b is in effect, characters in a field are counted from the beginning of the preceding whitespace. OPTS is one or more single-letter ordering options [bdfgiMhnRrV], which override global ordering options for that key. If no key is given, use the entire line as the key.")
            .value_name("KEYDEF")
            .action(ArgAction::Append))
        .arg(flag("merge", 'm', "merge", "Merge already sorted files; do not sort"))
        .arg(Arg::new("output")
            .short('o')
            .long("output")
            .help("Write result to FILE instead of standard output")
            .value_name("FILE"))
        .arg(flag("stable", 's', "stable", "Stabilize sort by disabling last-resort comparison"))
        .arg(Arg::new("buffer-size")
            .short('S')
            .long("buffer-size")
            .help("Use SIZE for main memory buffer; suffixes % b K M G T P E Z Y")
            .value_name("SIZE"))
        .arg(Arg::new("field-separator")
            .short('t')
            .long("field-separator")
            .help("Use SEP instead of non-blank to blank transition")
            .value_name("SEP")
            .allow_hyphen_values(true))
        .arg(Arg::new("temporary-directory")
            .short('T')
            .long("temporary-directory")
            .help("Use DIR for temporaries, not $TMPDIR or /tmp")
            .value_name("DIR"))
        .arg(Arg::new("parallel")
            .long("parallel")
            .help("Accepted for compatibility; sorting is single-threaded")
            .value_name("N"))
        .arg(flag("unique", 'u', "unique", "Output only the first of an equal run"))
        .arg(flag("zero-terminated", 'z', "zero-terminated", "Line delimiter is NUL, not newline"))
        .arg(Arg::new("header")
            .long("header")
            .help("Keep the first N lines on top; N[,every|first] chooses which files carry headers")
            .value_name("N"))
        .arg(Arg::new("locale")
            .long("locale")
            .help("Locale for text and numbers: LOCALE or TEXT,NUMBER; 'none' means C")
            .value_name("LOCALE"))
        .arg(Arg::new("encoding")
            .long("encoding")
            .help("Charset of input and output: CHARSET or IN,OUT")
            .value_name("CHARSET"))

        .arg(Arg::new("help")
            .long("help")
            .help("Display this help and exit")
            .action(ArgAction::Help))
        .arg(Arg::new("version")
            .long("version")
            .help("Output version information and exit")
            .action(ArgAction::Version))
}

/// Split an obsolete `+POS`/`-POS` into field, character and option letters
fn parse_obsolete_position(pos: &str) -> Option<(usize, usize, &str)> {
    let digits = pos.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let field = pos[..digits].parse().ok()?;
    let mut rest = &pos[digits..];
    let mut chars = 0;
    if let Some(after_dot) = rest.strip_prefix('.') {
        let n = after_dot.bytes().take_while(u8::is_ascii_digit).count();
        if n == 0 {
            return None;
        }
        chars = after_dot[..n].parse().ok()?;
        rest = &after_dot[n..];
    }
    rest.chars()
        .all(|c| "bdfghiMnRrV".contains(c))
        .then_some((field, chars, rest))
}

/// Convert obsolete `+POS1 [-POS2]` key syntax to `-k`
fn convert_legacy_syntax(args: &[String]) -> Vec<String> {
    let mut converted = Vec::with_capacity(args.len());
    let mut iter = args.iter().peekable();
    if let Some(program) = iter.next() {
        converted.push(program.clone());
    }

    while let Some(arg) = iter.next() {
        let Some((field, chars, opts)) = arg.strip_prefix('+').and_then(parse_obsolete_position)
        else {
            converted.push(arg.clone());
            continue;
        };

        let mut keydef = if chars == 0 {
            format!("{}{opts}", field + 1)
        } else {
            format!("{}.{}{opts}", field + 1, chars + 1)
        };
        let end = iter
            .peek()
            .and_then(|next| next.strip_prefix('-'))
            .and_then(parse_obsolete_position);
        if let Some((end_field, end_chars, end_opts)) = end {
            if end_chars == 0 {
                keydef.push_str(&format!(",{end_field}{end_opts}"));
            } else {
                keydef.push_str(&format!(",{}.{end_chars}{end_opts}", end_field + 1));
            }
            iter.next();
        }
        converted.push("-k".to_string());
        converted.push(keydef);
    }

    converted
}

fn parse_count(matches: &ArgMatches, id: &str, option: &str) -> SortResult<Option<usize>> {
    matches
        .get_one::<String>(id)
        .map(|value| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| SortError::invalid_option(option, &format!("invalid number: {value}")))
        })
        .transpose()
}

/// Parse configuration from command line matches
fn parse_config_from_matches(matches: &ArgMatches) -> SortResult<SortConfig> {
    let mut options = KeyOptions::default();
    for (id, letter) in ORDERING_FLAGS {
        if matches.get_flag(id) {
            options.apply_global_flag(letter)?;
        }
    }
    if let Some(word) = matches.get_one::<String>("sort") {
        options.set_sort_kind(SortKind::from_str(word)?)?;
    }

    let mut builder = SortConfigBuilder::new().global_options(options);
    if let Some(keydefs) = matches.get_many::<String>("key") {
        for keydef in keydefs {
            builder = builder.key(keydef);
        }
    }

    let check = if matches.get_flag("check-quiet") {
        Some(CheckKind::Quiet)
    } else {
        matches
            .get_one::<String>("check")
            .map(|when| CheckKind::from_str(when))
            .transpose()?
    };
    if let Some(kind) = check {
        if matches.get_flag("merge") {
            return Err(SortError::conflicting_options("options '-cm' are incompatible"));
        }
        if matches.get_one::<String>("output").is_some() {
            return Err(SortError::conflicting_options("options '-co' are incompatible"));
        }
        builder = builder.process(ProcessKind::Check(kind));
    } else if matches.get_flag("merge") {
        builder = builder.process(ProcessKind::Merge);
    }

    if matches.get_flag("unique") {
        builder = builder.unique();
    }
    if matches.get_flag("stable") {
        builder = builder.stable();
    }
    if matches.get_flag("zero-terminated") {
        builder = builder.zero_terminated();
    }
    if matches.get_flag("debug") {
        builder = builder.debug();
    }

    if let Some(sep) = matches.get_one::<String>("field-separator") {
        if let FieldSeparator::Char(c) = FieldSeparator::parse(sep)? {
            builder = builder.field_separator(c);
        }
    }
    if let Some(output) = matches.get_one::<String>("output") {
        builder = builder.output_file(output.clone());
    }
    if let Some(size) = matches.get_one::<String>("buffer-size") {
        builder = builder.buffer_size(BufferSize::from_str(size)?);
    }
    if let Some(batch) = parse_count(matches, "batch-size", "--batch-size")? {
        builder = builder.batch_size(batch);
    }
    if let Some(threads) = parse_count(matches, "parallel", "--parallel")? {
        builder = builder.parallel(threads);
    }
    if let Some(dir) = matches.get_one::<String>("temporary-directory") {
        builder = builder.temp_dir(dir.clone());
    }
    if let Some(program) = matches.get_one::<String>("compress-program") {
        builder = builder.compress_program(program);
    }
    if let Some(source) = matches.get_one::<String>("random-source") {
        builder = builder.random_source(source.clone());
    }
    if let Some(header) = matches.get_one::<String>("header") {
        let (lines, every_file) = parse_header(header)?;
        builder = builder.header(lines, every_file);
    }

    let (text_locale, number_locale) = match matches.get_one::<String>("locale") {
        Some(value) => parse_locale_pair(value)?,
        None => (LocaleSpec::Environment, LocaleSpec::Environment),
    };
    builder = builder.locales(text_locale, number_locale);

    if let Some(value) = matches.get_one::<String>("encoding") {
        let (input, output) = parse_encoding_pair(value)?;
        builder = builder.encodings(input, output);
    }

    let files: Vec<String> = matches
        .get_many::<String>("files")
        .unwrap_or_default()
        .cloned()
        .collect();
    if let Some(spec) = matches.get_one::<String>("files0-from") {
        if !files.is_empty() {
            return Err(SortError::conflicting_options(
                "--files0-from: input files were specified but input has already been selected",
            ));
        }
        builder = builder.input_files(read_files0_from(spec)?);
    } else if !(files.len() == 1 && files[0] == "-") {
        builder = builder.input_files(files);
    }

    builder.build()
}

/// Read input file names listed in `F[,encoding=CHARSET][,sep='CHARS']`
fn read_files0_from(spec: &str) -> SortResult<Vec<String>> {
    let mut segments = spec.split(',');
    let name = segments.next().unwrap_or_default();
    let mut encoding = encoding_rs::UTF_8;
    let mut separators = vec![0u8];

    for segment in segments {
        let segment = segment.trim();
        let Some((option, value)) = segment.split_once('=') else {
            return Err(SortError::invalid_option("--files0-from", "encoding or sep expected"));
        };
        let value = value.trim();
        match option.trim().to_ascii_lowercase().as_str() {
            "encoding" => encoding = encoding_for_label(value)?,
            "sep" => separators = parse_separator_set(value)?,
            _ => {
                return Err(SortError::invalid_option("--files0-from", "encoding or sep expected"))
            }
        }
    }

    let mut contents = Vec::new();
    if name == "-" {
        std::io::stdin()
            .read_to_end(&mut contents)
            .with_file_context("-")?;
    } else {
        contents = std::fs::read(name).with_file_context(name)?;
    }

    let mut files = Vec::new();
    for raw in contents.split(|b| separators.contains(b)) {
        if raw.is_empty() {
            continue;
        }
        let (decoded, _, had_errors) = encoding.decode(raw);
        if had_errors {
            return Err(SortError::Decode {
                file: name.to_string(),
                line: files.len() as u64 + 1,
                encoding: encoding.name(),
            });
        }
        let file = decoded.trim();
        if !file.is_empty() {
            files.push(file.to_string());
        }
    }
    Ok(files)
}

/// `'CHARS'` with `\` or `/` escapes for t r n f 0
fn parse_separator_set(value: &str) -> SortResult<Vec<u8>> {
    let inner = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SortError::invalid_option("--files0-from", "sep expects '...'"))?;

    let mut separators = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        let c = match c {
            '\\' | '/' if chars.peek().is_some() => match chars.next() {
                Some('t') => '\t',
                Some('r') => '\r',
                Some('n') => '\n',
                Some('f') => '\x0c',
                Some('0') => '\0',
                Some(other) => other,
                None => c,
            },
            _ => c,
        };
        if !c.is_ascii() {
            return Err(SortError::invalid_option(
                "--files0-from",
                "separators must be ASCII characters",
            ));
        }
        separators.push(c as u8);
    }
    Ok(separators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> SortResult<SortConfig> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let matches = build_cli()
            .try_get_matches_from(convert_legacy_syntax(&args))
            .expect("arguments should parse");
        parse_config_from_matches(&matches)
    }

    #[test]
    fn test_parse_basic_config() {
        let config = parse(&["sort", "-n", "-r"]).unwrap();
        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.keys[0].options.sort_kind, SortKind::Numeric);
        assert!(config.global_key_only);
        assert!(config.reverse);
        assert_eq!(config.text_locale, LocaleSpec::Environment);
    }

    #[test]
    fn test_parse_complex_config() {
        let config = parse(&[
            "sort", "-k", "2,4", "-t", ":", "-u", "-o", "output.txt", "input.txt",
        ])
        .unwrap();
        assert!(config.unique);
        assert_eq!(config.field_separator, FieldSeparator::Char(':'));
        assert_eq!(config.output_file, Some("output.txt".to_string()));
        assert_eq!(config.input_files, vec!["input.txt".to_string()]);
        assert_eq!(config.keys[0].to_string(), "2,4");
    }

    #[test]
    fn test_conflicting_options() {
        assert!(matches!(
            parse(&["sort", "-c", "-m"]),
            Err(SortError::ConflictingOptions { .. })
        ));
        assert!(parse(&["sort", "-n", "-g"]).is_err());
    }

    #[test]
    fn test_check_variants() {
        let plain = parse(&["sort", "-c", "file"]).unwrap();
        assert_eq!(plain.process, ProcessKind::Check(CheckKind::DiagnoseFirst));
        assert_eq!(plain.input_files, vec!["file".to_string()]);
        let quiet = parse(&["sort", "--check=quiet"]).unwrap();
        assert_eq!(quiet.process, ProcessKind::Check(CheckKind::Quiet));
        let silent = parse(&["sort", "-C"]).unwrap();
        assert_eq!(silent.process, ProcessKind::Check(CheckKind::Quiet));
    }

    #[test]
    fn test_sort_word_and_extras() {
        let config = parse(&[
            "sort",
            "--sort=version",
            "--header",
            "2,first",
            "--locale",
            "none",
            "--batch-size",
            "4",
            "-S",
            "2M",
        ])
        .unwrap();
        assert_eq!(config.keys[0].options.sort_kind, SortKind::Version);
        assert_eq!((config.header_lines, config.header_every_file), (2, false));
        assert_eq!(config.text_locale, LocaleSpec::C);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.buffer_size, Some(BufferSize::Bytes(2 << 20)));
    }

    #[test]
    fn test_convert_legacy_syntax() {
        let args: Vec<String> = ["sort", "+1", "-2", "+0.2n", "file"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            convert_legacy_syntax(&args),
            vec!["sort", "-k", "2,2", "-k", "1.3n", "file"]
        );
    }

    #[test]
    fn test_files0_from_with_separator_and_trimming() {
        let mut list = tempfile::NamedTempFile::new().unwrap();
        list.write_all(b" a.txt ;b.txt\n;;").unwrap();
        list.flush().unwrap();
        let spec = format!("{},sep=';\\n'", list.path().display());
        assert_eq!(read_files0_from(&spec).unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_files0_from_default_nul_separator() {
        let mut list = tempfile::NamedTempFile::new().unwrap();
        list.write_all(b"one\0two\0").unwrap();
        list.flush().unwrap();
        let spec = list.path().display().to_string();
        assert_eq!(read_files0_from(&spec).unwrap(), vec!["one", "two"]);
        assert!(read_files0_from(&format!("{spec},bogus")).is_err());
    }

    #[test]
    fn test_configuration_errors_point_at_help() {
        let err = parse(&["sort", "-k", "0"]).unwrap_err();
        assert!(error_report(&err).ends_with("Try 'sort --help' for more information.\n"));

        let err = SortError::file_not_found("missing.txt");
        assert_eq!(error_report(&err).lines().count(), 1);
    }
}
