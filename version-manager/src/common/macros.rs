/// Builds the argument list of a command from expressions which implement ToString. A trailing
/// comma is allowed.
#[macro_export]
macro_rules! vec_to_strings {
    ($($arg:expr),* $(,)?) => {
        vec![$($arg.to_string()),*]
    };
}
