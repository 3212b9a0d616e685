use std::env;
use std::fs;

use xylo::html;

pub fn main() {
    let path = env::args().nth(1).expect("usage: xylo <file>");
    let bytes = fs::read(&path).expect("Missing input!");

    let doc = html::fromstring(&bytes, true).expect("Input did not parse");
    let root = doc.root().expect("Parsed document has no root");

    let elements = doc.iter(root, None).count();
    let text_bytes: usize = doc.itertext(root).map(str::len).sum();

    println!("{path}: {elements} elements, {text_bytes} bytes of text");
}
