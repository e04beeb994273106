//! Parse/format roundtrip tests.
//!
//! Text patches must roundtrip byte-for-byte. Binary patches roundtrip
//! structurally: deflate output differs between implementations, so the
//! formatted bytes are reparsed and compared as records instead.

use git_patch::{parse, BinaryPatchMethod};

fn assert_text_roundtrip(patch: &str) {
    let parsed = parse(patch.as_bytes()).unwrap();
    let mut out = Vec::new();
    for file in &parsed.files {
        file.write_to(&mut out).unwrap();
    }
    assert_eq!(
        String::from_utf8_lossy(&out),
        patch,
        "patch did not roundtrip byte-for-byte"
    );
}

#[test]
fn roundtrip_modify() {
    assert_text_roundtrip(
        "diff --git a/f b/f\n\
         index 1c23fcc..40a1b33 100644\n\
         --- a/f\n\
         +++ b/f\n\
         @@ -2,3 +4,3 @@\n \
         ctx\n\
         -old\n\
         +new\n \
         ctx\n",
    );
}

#[test]
fn roundtrip_new_empty_file() {
    assert_text_roundtrip(
        "diff --git a/e b/e\n\
         new file mode 100644\n\
         index 0000000..e69de29\n",
    );
}

#[test]
fn roundtrip_new_file_with_content() {
    assert_text_roundtrip(
        "diff --git a/added.txt b/added.txt\n\
         new file mode 100644\n\
         index 0000000..8ab686e\n\
         --- /dev/null\n\
         +++ b/added.txt\n\
         @@ -0,0 +1,2 @@\n\
         +hello\n\
         +world\n",
    );
}

#[test]
fn roundtrip_deleted_file() {
    assert_text_roundtrip(
        "diff --git a/gone.txt b/gone.txt\n\
         deleted file mode 100644\n\
         index 8ab686e..0000000\n\
         --- a/gone.txt\n\
         +++ /dev/null\n\
         @@ -1,2 +0,0 @@\n\
         -hello\n\
         -world\n",
    );
}

#[test]
fn roundtrip_rename() {
    assert_text_roundtrip(
        "diff --git a/foo b/bar\n\
         similarity index 100%\n\
         rename from foo\n\
         rename to bar\n",
    );
}

#[test]
fn roundtrip_copy() {
    assert_text_roundtrip(
        "diff --git a/orig b/dupe\n\
         similarity index 90%\n\
         copy from orig\n\
         copy to dupe\n\
         index 1c23fcc..40a1b33\n",
    );
}

#[test]
fn roundtrip_mode_change() {
    assert_text_roundtrip(
        "diff --git a/script.sh b/script.sh\n\
         old mode 100644\n\
         new mode 100755\n",
    );
}

#[test]
fn roundtrip_multiple_hunks_with_comments() {
    assert_text_roundtrip(
        "diff --git a/src/main.c b/src/main.c\n\
         index 0123456..789abcd 100644\n\
         --- a/src/main.c\n\
         +++ b/src/main.c\n\
         @@ -10,3 +10,4 @@ int main(void) {\n \
         \tint x = 0;\n\
         +\tint y = 1;\n \
         \treturn x;\n \
         }\n\
         @@ -40,3 +41,3 @@ static void helper(void) {\n \
         before\n\
         -mid\n\
         +MID\n \
         after\n",
    );
}

#[test]
fn roundtrip_no_newline_markers() {
    assert_text_roundtrip(
        "diff --git a/f b/f\n\
         --- a/f\n\
         +++ b/f\n\
         @@ -1,2 +1,2 @@\n \
         keep\n\
         -old\n\
         \\ No newline at end of file\n\
         +new\n\
         \\ No newline at end of file\n",
    );
}

#[test]
fn roundtrip_quoted_paths() {
    assert_text_roundtrip(
        "diff --git \"a/sp\\303\\244ce\" \"b/sp\\303\\244ce\"\n\
         index 1c23fcc..40a1b33 100644\n\
         --- \"a/sp\\303\\244ce\"\n\
         +++ \"b/sp\\303\\244ce\"\n\
         @@ -1 +1 @@\n\
         -a\n\
         +b\n",
    );
}

#[test]
fn roundtrip_hunk_range_forms() {
    assert_text_roundtrip(
        "diff --git a/f b/f\n\
         --- a/f\n\
         +++ b/f\n\
         @@ -1 +1 @@\n\
         -a\n\
         +b\n\
         @@ -5,2 +5 @@\n\
         -c\n\
         -d\n\
         +cd\n",
    );
}

#[test]
fn roundtrip_binary_patch_structurally() {
    let patch = "diff --git a/dir/ten.bin b/dir/ten.bin\n\
                 new file mode 100644\n\
                 index 0000000..c297f43\n\
                 GIT binary patch\n\
                 literal 40\n\
                 gcmZQzU|?i`U?w2V48*KJ%mKu_Kr9NxN<eH500b)lkN^Mx\n\
                 \n\
                 literal 0\n\
                 HcmV?d00001\n\
                 \n";
    let first = parse(patch.as_bytes()).unwrap();

    let mut out = Vec::new();
    for file in &first.files {
        file.write_to(&mut out).unwrap();
    }
    let second = parse(out.as_slice()).unwrap();

    assert_eq!(first.files, second.files);

    let file = &second.files[0];
    assert!(file.is_binary);
    let forward = file.binary_fragment.as_ref().unwrap();
    assert_eq!(forward.method, BinaryPatchMethod::Literal);
    assert_eq!(forward.size, 40);
}

#[test]
fn roundtrip_preserves_file_count_and_order() {
    let patch = "diff --git a/one b/one\n\
                 --- a/one\n\
                 +++ b/one\n\
                 @@ -1 +1 @@\n\
                 -a\n\
                 +b\n\
                 diff --git a/two b/two\n\
                 deleted file mode 100644\n\
                 index 8ab686e..0000000\n\
                 --- a/two\n\
                 +++ /dev/null\n\
                 @@ -1 +0,0 @@\n\
                 -gone\n";
    let parsed = parse(patch.as_bytes()).unwrap();
    assert_eq!(parsed.files.len(), 2);

    let mut out = Vec::new();
    for file in &parsed.files {
        file.write_to(&mut out).unwrap();
    }
    assert_eq!(String::from_utf8_lossy(&out), patch);
}
